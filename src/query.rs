//! Subscriptions to answers seen on the link.
//!
//! A [`Query`] is pulled by its owner. A [`BackgroundQuery`] runs a task that pulls and
//! hands each batch to a handler until the handler fails or the query is stopped.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::message::RecordType;
use crate::name::Name;
use crate::record::Answer;
use crate::responder::Responder;

/// True when a query for (`query_name`, `query_type`) wants answers for (`name`, `rtype`).
pub fn subscribes(query_name: &Name, query_type: RecordType, name: &Name, rtype: RecordType) -> bool {
    (query_name.is_wildcard() || query_name == name)
        && (query_type == RecordType::Any || query_type == rtype)
}

/// A subscription on (name, type). Answers already cached are available right after
/// start, later ones as they arrive.
pub struct Query {
    id: u64,
    name: Name,
    rtype: RecordType,
    responder: Arc<Responder>,
    receiver: UnboundedReceiver<Vec<Answer>>,
}

impl Query {
    /// `name` may be `*` to see every answer on the link without asking for any.
    pub async fn start(responder: &Arc<Responder>, name: &str, rtype: RecordType) -> Result<Self> {
        let name = Name::parse(name)?;
        Self::start_name(responder, name, rtype).await
    }

    pub async fn start_name(responder: &Arc<Responder>, name: Name, rtype: RecordType) -> Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = responder.query_start(name.clone(), rtype, sender).await?;
        Ok(Self {
            id,
            name,
            rtype,
            responder: responder.clone(),
            receiver,
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn rtype(&self) -> RecordType {
        self.rtype
    }

    pub fn subscribes_to(&self, answer: &Answer) -> bool {
        subscribes(&self.name, self.rtype, &answer.name, answer.rtype())
    }

    /// Wait for the next batch of answers. `None` once the responder is gone.
    pub async fn pop(&mut self) -> Option<Vec<Answer>> {
        self.receiver.recv().await
    }

    pub fn try_pop(&mut self) -> Option<Vec<Answer>> {
        self.receiver.try_recv().ok()
    }

    /// Number of batches waiting.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Deregister. Batches not yet popped are discarded.
    pub async fn stop(mut self) {
        self.receiver.close();
        self.responder.query_stop(self.id).await;
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q?{}/{}", self.name, self.rtype)
    }
}

/// A query whose answers are passed to a handler on a dedicated task.
///
/// The task ends when the handler returns an error or panics, when the responder goes
/// away, or on [`BackgroundQuery::stop`]. In every case the subscription is removed.
pub struct BackgroundQuery {
    name: Name,
    rtype: RecordType,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundQuery {
    pub async fn start<F>(
        responder: &Arc<Responder>,
        name: &str,
        rtype: RecordType,
        handler: F,
    ) -> Result<Self>
    where
        F: FnMut(&Query, Vec<Answer>) -> Result<()> + Send + 'static,
    {
        let name = Name::parse(name)?;
        Self::start_name(responder, name, rtype, handler).await
    }

    pub async fn start_name<F>(
        responder: &Arc<Responder>,
        name: Name,
        rtype: RecordType,
        mut handler: F,
    ) -> Result<Self>
    where
        F: FnMut(&Query, Vec<Answer>) -> Result<()> + Send + 'static,
    {
        let mut query = Query::start_name(responder, name, rtype).await?;
        let name = query.name.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let worker = tokio::spawn(async move {
            loop {
                let answers = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    answers = query.pop() => match answers {
                        Some(a) => a,
                        None => break,
                    },
                };
                match std::panic::catch_unwind(AssertUnwindSafe(|| handler(&query, answers))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        log::error!("{} handler failed: {:?}", query, e);
                        break;
                    }
                    Err(_) => {
                        log::error!("{} handler panicked", query);
                        break;
                    }
                }
            }
            log::debug!("{} worker exit", query);
            query.stop().await;
        });

        Ok(Self {
            name,
            rtype,
            cancel,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn rtype(&self) -> RecordType {
        self.rtype
    }

    /// False once the worker has exited.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop the worker and wait until the subscription is removed. A handler call in
    /// progress completes first.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                log::error!("q?{}/{} worker failed: {:?}", self.name, self.rtype, e);
            }
        }
    }
}

impl Drop for BackgroundQuery {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Display for BackgroundQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q?{}/{}", self.name, self.rtype)
    }
}
