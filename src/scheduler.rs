//! The cacher loop: expires answers, re-queries the ones subscribers still want and
//! repeats unanswered questions.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::message::{Message, RecordType};
use crate::name::Name;
use crate::responder::{Responder, Subscription};

/// Shortest sleep between two sweeps.
pub const MIN_DELAY: Duration = Duration::from_secs(1);

/// Result of one pass over the cache.
#[derive(Debug, Default)]
pub(crate) struct Sweep {
    /// Questions to multicast now, possibly with duplicates.
    pub questions: Vec<(Name, RecordType)>,
    /// Earliest time something needs attention again.
    pub wake: Option<Instant>,
}

impl Sweep {
    fn wake_for(&mut self, at: Instant) {
        self.wake = Some(self.wake.map_or(at, |w| w.min(at)));
    }
}

fn subscribed(queries: &[Subscription], name: &Name, rtype: RecordType) -> bool {
    queries.iter().any(|q| q.subscribes_to(name, rtype))
}

pub(crate) fn sweep_cache(cache: &mut Cache, queries: &[Subscription], now: Instant) -> Sweep {
    let mut sweep = Sweep::default();

    for types in cache.cached.values_mut() {
        for answers in types.values_mut() {
            answers.retain_mut(|an| {
                if an.expired_at(now) {
                    log::debug!("-- a {}", an);
                    return false;
                }
                // nothing to ask for a goodbye, only wait for it to go
                if an.is_goodbye() {
                    sweep.wake_for(an.expiry());
                    return true;
                }
                let Some(refresh) = an.refresh() else {
                    return true;
                };
                if !subscribed(queries, &an.name, an.rtype()) {
                    log::debug!("no refresh of: a {}", an);
                    return true;
                }
                if now >= refresh {
                    an.retries += 1;
                    sweep.questions.push((an.name.clone(), an.rtype()));
                }
                if let Some(refresh) = an.refresh() {
                    sweep.wake_for(refresh);
                }
                true
            });
        }
        types.retain(|_, answers| !answers.is_empty());
    }
    cache.cached.retain(|_, types| !types.is_empty());

    for types in cache.asked.values_mut() {
        types.retain(|rtype, qu| {
            let refresh = match qu.refresh() {
                Some(r) if subscribed(queries, &qu.name, *rtype) => r,
                _ => {
                    log::debug!("no refresh of: q {}", qu);
                    return false;
                }
            };
            if now >= refresh {
                // asking again counts like any other sighting of the question
                qu.update_at(now);
                sweep.questions.push((qu.name.clone(), *rtype));
            }
            if let Some(refresh) = qu.refresh() {
                sweep.wake_for(refresh);
            }
            true
        });
    }
    cache.asked.retain(|_, types| !types.is_empty());

    sweep
}

/// How long to sleep until `wake`, never less than [`MIN_DELAY`]. `None` means sleep
/// until woken.
pub fn next_delay(wake: Option<Instant>, now: Instant) -> Option<Duration> {
    wake.map(|w| w.saturating_duration_since(now).max(MIN_DELAY))
}

impl Responder {
    /// Run one sweep and send the questions it produced. Returns the delay until the
    /// next one.
    pub(crate) async fn sweep(&self) -> Option<Duration> {
        let mut state = self.lock().await;
        log::debug!("sweep begin");
        state.queries.retain(|q| !q.sender.is_closed());

        let now = Instant::now();
        let state = &mut *state;
        let sweep = sweep_cache(&mut state.cache, &state.queries, now);
        state.waketime = sweep.wake;

        let mut msg = Message::query();
        for (name, rtype) in sweep.questions {
            msg.add_question(name, rtype);
        }
        msg.dedup();
        for q in &msg.questions {
            log::debug!("-> q {} {}", q.name, q.rtype);
        }
        if !msg.questions.is_empty() {
            // logged by send, retried at the next refresh
            let _ = self.send(msg, None);
        }

        let delay = next_delay(sweep.wake, now);
        if let Some(d) = delay {
            log::debug!("refresh in {:?}", d);
        }
        log::debug!("sweep end");
        delay
    }
}

pub(crate) async fn cacher_loop(
    responder: Weak<Responder>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut delay: Option<Duration> = None;
    loop {
        match delay {
            Some(d) => {
                tokio::select! {
                    _ = tokio::time::sleep(d) => {}
                    _ = wake.notified() => {}
                    _ = cancel.cancelled() => return,
                }
            }
            None => {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = cancel.cancelled() => return,
                }
            }
        }
        let Some(responder) = responder.upgrade() else {
            return;
        };
        delay = responder.sweep().await;
    }
}
