//! The responder: owns the cache and the socket, answers for local services and feeds
//! subscribed queries.
//!
//! One lock serializes everything that touches shared state: the receive loop, the
//! cacher loop and every start/stop call. Answers reach queries through per-query
//! channels, so a slow consumer never holds the lock.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::config::ResponderConfig;
use crate::message::{Message, RecordType};
use crate::name::Name;
use crate::query::{self, BackgroundQuery, Query};
use crate::record::{Answer, Question};
use crate::scheduler;
use crate::service::{RegisteredService, Service, ServiceHandle};
use crate::transport::{self, Host, SendCommand};

/// A query's registration with the responder.
pub(crate) struct Subscription {
    pub id: u64,
    pub name: Name,
    pub rtype: RecordType,
    pub sender: UnboundedSender<Vec<Answer>>,
}

impl Subscription {
    pub fn subscribes_to(&self, name: &Name, rtype: RecordType) -> bool {
        !self.sender.is_closed() && query::subscribes(&self.name, self.rtype, name, rtype)
    }
}

pub(crate) struct ResponderState {
    pub cache: Cache,
    pub queries: Vec<Subscription>,
    pub services: Vec<RegisteredService>,
    /// When the cacher loop is next due, if anything is pending.
    pub waketime: Option<Instant>,
}

pub struct Responder {
    state: Mutex<ResponderState>,
    wake: Arc<Notify>,
    send_tx: UnboundedSender<SendCommand>,
    host: Option<Host>,
    config: ResponderConfig,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl Responder {
    /// Bind the mDNS socket and start the receive, send and cacher loops.
    pub async fn new(config: ResponderConfig) -> Result<Arc<Self>> {
        let host = detect_host(&config);
        let interface = host.as_ref().map_or(Ipv4Addr::UNSPECIFIED, |h| h.addr);
        let std_sock = transport::create_multicast_socket(&config, interface)?;
        let socket = Arc::new(UdpSocket::from_std(std_sock)?);
        let group = SocketAddr::V4(SocketAddrV4::new(config.multicast_addr, config.port));
        let udp_size = config.udp_size;

        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let responder = Self::build(config, host, send_tx);

        {
            let socket = socket.clone();
            let weak = Arc::downgrade(&responder);
            let cancel = responder.cancel.child_token();
            tokio::spawn(async move {
                transport::recv_loop(socket, weak, udp_size, cancel).await;
            });
        }
        {
            let cancel = responder.cancel.child_token();
            tokio::spawn(async move {
                transport::send_loop(socket, group, send_rx, cancel).await;
            });
        }
        Ok(responder)
    }

    /// A responder without a socket. Outbound packets go to the returned receiver and
    /// inbound packets are supplied with [`Responder::handle_packet`]. Must be called
    /// from within a tokio runtime.
    pub fn detached(config: ResponderConfig) -> (Arc<Self>, UnboundedReceiver<SendCommand>) {
        let host = detect_host(&config);
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        (Self::build(config, host, send_tx), send_rx)
    }

    fn build(
        config: ResponderConfig,
        host: Option<Host>,
        send_tx: UnboundedSender<SendCommand>,
    ) -> Arc<Self> {
        let responder = Arc::new(Self {
            state: Mutex::new(ResponderState {
                cache: Cache::new(),
                queries: Vec::new(),
                services: Vec::new(),
                waketime: None,
            }),
            wake: Arc::new(Notify::new()),
            send_tx,
            host,
            config,
            next_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
        });
        log::debug!("start");

        let weak = Arc::downgrade(&responder);
        let wake = responder.wake.clone();
        let cancel = responder.cancel.child_token();
        tokio::spawn(async move {
            scheduler::cacher_loop(weak, wake, cancel).await;
        });
        responder
    }

    pub fn host(&self) -> Option<&Host> {
        self.host.as_ref()
    }

    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, ResponderState> {
        self.state.lock().await
    }

    /// Process one inbound packet. Undecodable packets are logged and dropped.
    pub async fn handle_packet(&self, data: &[u8], from: SocketAddr) -> Result<()> {
        let msg = match Message::decode(data) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("decode error from {}: {:?}", from, e);
                return Ok(());
            }
        };
        log::debug!(
            "from {} -> id {} qr={} qcnt={} acnt={}",
            from,
            msg.id,
            if msg.is_query() { 'Q' } else { 'R' },
            msg.questions.len(),
            msg.answers.len()
        );

        let mut state = self.state.lock().await;
        if msg.is_query() {
            self.handle_query(&mut state, &msg, from)
        } else {
            self.handle_response(&mut state, &msg);
            Ok(())
        }
    }

    fn handle_query(&self, state: &mut ResponderState, msg: &Message, from: SocketAddr) -> Result<()> {
        // unicast questions are neither recorded nor answered by multicast
        let questions = msg.questions.iter().filter(|q| !q.unicast);
        // our own questions come back over loopback, the sweep has already counted them
        if !self.is_own(from) {
            for q in questions.clone() {
                log::debug!("++ q {}/{}", q.name, q.rtype);
                state.cache.cache_question(&q.name, q.rtype);
            }
        }

        let mut reply = Message::response();
        for q in questions {
            for svc in &state.services {
                svc.answer_question(&q.name, q.rtype, &mut reply);
            }
        }
        reply.dedup();

        // known-answer suppression: the querier already has it with at least half the TTL left
        reply.answers.retain(|an| {
            !msg.answers.iter().any(|known| {
                known.name == an.name && known.data == an.data && known.ttl > an.ttl / 2
            })
        });

        if reply.answers.is_empty() {
            return Ok(());
        }
        self.send(reply, Some((msg.id, from)))
    }

    fn handle_response(&self, state: &mut ResponderState, msg: &Message) {
        let now = Instant::now();
        let mut cached = Vec::new();
        for rr in &msg.answers {
            let an = Answer::from_rr(rr, now);
            log::debug!("++ a {}", an);
            if let Some(an) = state.cache.cache_answer(an) {
                log::debug!(" cached");
                self.wake_cacher_for(state, an.refresh());
                cached.push(an);
            }
        }
        if cached.is_empty() {
            return;
        }

        state.queries.retain(|q| !q.sender.is_closed());
        for q in &state.queries {
            let answers: Vec<Answer> = cached
                .iter()
                .filter(|an| q.subscribes_to(&an.name, an.rtype()))
                .cloned()
                .collect();
            if answers.is_empty() {
                continue;
            }
            log::debug!("push {} to q?{}/{}", answers.len(), q.name, q.rtype);
            let _ = q.sender.send(answers);
        }
    }

    fn is_own(&self, from: SocketAddr) -> bool {
        from.port() == self.config.port
            && self.host.as_ref().is_some_and(|h| from.ip() == IpAddr::V4(h.addr))
    }

    /// Wake the cacher loop if `refresh` comes before its current wake time.
    pub(crate) fn wake_cacher_for(&self, state: &ResponderState, refresh: Option<Instant>) {
        let Some(refresh) = refresh else {
            return;
        };
        if state.waketime.map_or(true, |w| refresh < w) {
            self.wake.notify_one();
        }
    }

    /// Queue `msg` for sending. A reply to a query from a port other than the mDNS port
    /// is also unicast back to the querier with its id and questions.
    pub(crate) fn send(&self, msg: Message, reply_to: Option<(u16, SocketAddr)>) -> Result<()> {
        let result = self.send_inner(msg, reply_to);
        if let Err(e) = &result {
            log::error!("send msg failed: {:?}", e);
        }
        result
    }

    fn send_inner(&self, mut msg: Message, reply_to: Option<(u16, SocketAddr)>) -> Result<()> {
        for an in &msg.answers {
            log::debug!("-> an {}", an);
        }
        for ad in &msg.additional {
            log::debug!("-> ad {}", ad);
        }
        if let Some((qid, addr)) = reply_to {
            if addr.port() != self.config.port {
                log::debug!("unicast for qid {} to {}", qid, addr);
                msg.id = qid;
                self.enqueue(SendCommand::Unicast(msg.encode()?, addr))?;
            }
        }
        // multicast always uses id zero and does not repeat the questions
        msg.id = 0;
        if msg.is_response() {
            msg.questions.clear();
        }
        self.enqueue(SendCommand::Multicast(msg.encode()?))
    }

    fn enqueue(&self, cmd: SendCommand) -> Result<()> {
        self.send_tx
            .send(cmd)
            .map_err(|_| anyhow::anyhow!("send loop has stopped"))
    }

    pub(crate) async fn query_start(
        &self,
        name: Name,
        rtype: RecordType,
        sender: UnboundedSender<Vec<Answer>>,
    ) -> Result<u64> {
        let id = self.next_id();
        let mut state = self.state.lock().await;
        log::debug!("start query q?{}/{}", name, rtype);

        state.queries.push(Subscription {
            id,
            name: name.clone(),
            rtype,
            sender: sender.clone(),
        });

        let answers = state.cache.answers_for(&name, rtype);
        let answered = !answers.is_empty();
        if answered {
            let refresh = answers.iter().filter_map(Answer::refresh).min();
            self.wake_cacher_for(&state, refresh);
            let _ = sender.send(answers);
        }
        // an exact type already known is kept current by the answers' own refresh,
        // ANY may still be missing some types
        if name.is_wildcard() || (answered && rtype != RecordType::Any) {
            return Ok(id);
        }

        // someone is already asking, don't ask again
        let refresh = match state.cache.add_question(Question::new(name.clone(), rtype)) {
            Some(qu) => qu.refresh(),
            None => return Ok(id),
        };
        self.wake_cacher_for(&state, refresh);

        let mut msg = Message::query();
        msg.add_question(name.clone(), rtype);
        if let Err(e) = self.send(msg, None) {
            log::warn!("fail query q?{}/{} - {:?}", name, rtype, e);
            state.queries.retain(|q| q.id != id);
            return Err(e);
        }
        Ok(id)
    }

    pub(crate) async fn query_stop(&self, id: u64) {
        let mut state = self.state.lock().await;
        if let Some(q) = state.queries.iter().find(|q| q.id == id) {
            log::debug!("query q?{}/{} - stop", q.name, q.rtype);
        }
        state.queries.retain(|q| q.id != id);
    }

    pub async fn start_query(self: &Arc<Self>, name: &str, rtype: RecordType) -> Result<Query> {
        Query::start(self, name, rtype).await
    }

    pub async fn start_background_query<F>(
        self: &Arc<Self>,
        name: &str,
        rtype: RecordType,
        handler: F,
    ) -> Result<BackgroundQuery>
    where
        F: FnMut(&Query, Vec<Answer>) -> Result<()> + Send + 'static,
    {
        BackgroundQuery::start(self, name, rtype, handler).await
    }

    /// Register `service` and announce its records once.
    pub async fn start_service(self: &Arc<Self>, service: Service) -> Result<ServiceHandle> {
        let id = self.next_id();
        let registered = service.register(id, self.host.as_ref(), self.config.host_ttl)?;
        let instance = registered.instance.clone();

        let mut state = self.state.lock().await;
        log::debug!("start service {}", instance);
        let mut msg = Message::response();
        for rr in registered.announcements() {
            msg.add_answer(rr);
        }
        state.services.push(registered);

        if let Err(e) = self.send(msg, None) {
            log::warn!("fail service {} - {:?}", instance, e);
            state.services.retain(|s| s.id != id);
            return Err(e);
        }
        Ok(ServiceHandle::new(id, instance, self.clone()))
    }

    pub(crate) async fn service_stop(&self, id: u64) {
        let mut state = self.state.lock().await;
        if let Some(s) = state.services.iter().find(|s| s.id == id) {
            log::debug!("service {} - stop", s.instance);
        }
        state.services.retain(|s| s.id != id);
    }

    /// Answers currently cached for (name, type), without asking the network.
    pub async fn lookup(&self, name: &Name, rtype: RecordType) -> Vec<Answer> {
        self.state.lock().await.cache.answers_for(name, rtype)
    }

    /// Stop all background loops.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn detect_host(config: &ResponderConfig) -> Option<Host> {
    match transport::local_host(config) {
        Ok(host) => {
            log::debug!("host {} is {}", host.name, host.addr);
            Some(host)
        }
        Err(e) => {
            log::warn!("local host unknown, services need an explicit target: {:?}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{QuestionEntry, RecordData, RR};
    use std::time::Duration;

    fn n(s: &str) -> Name {
        Name::parse(s).unwrap()
    }

    fn config() -> ResponderConfig {
        ResponderConfig {
            hostname: Some("ensemble".to_owned()),
            host_address: Some(Ipv4Addr::new(10, 0, 0, 9)),
            ..ResponderConfig::default()
        }
    }

    fn peer() -> SocketAddr {
        "10.0.0.50:5353".parse().unwrap()
    }

    fn response(rrs: Vec<RR>) -> Vec<u8> {
        let mut msg = Message::response();
        for rr in rrs {
            msg.add_answer(rr);
        }
        msg.encode().unwrap()
    }

    fn a_rr(name: &str, ip: u8, ttl: u32) -> RR {
        RR::new(n(name), ttl, RecordData::A(Ipv4Addr::new(10, 0, 0, ip)))
    }

    fn multicast(cmd: SendCommand) -> Message {
        match cmd {
            SendCommand::Multicast(data) => Message::decode(&data).unwrap(),
            other => panic!("expected multicast, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn wildcard_query_sees_everything_in_order() {
        let (responder, mut sent) = Responder::detached(config());
        let mut q = responder
            .start_query("*", RecordType::Any)
            .await
            .unwrap();
        assert!(sent.try_recv().is_err());

        responder
            .handle_packet(&response(vec![a_rr("foo.local.", 1, 120)]), peer())
            .await
            .unwrap();
        responder
            .handle_packet(
                &response(vec![
                    a_rr("bar.local.", 2, 120),
                    RR::new(n("bar.local."), 120, RecordData::Txt(vec!["x=y".into()])),
                ]),
                peer(),
            )
            .await
            .unwrap();

        let first = q.pop().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name, n("foo.local"));
        let second = q.pop().await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].data, RecordData::A(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(second[1].rtype(), RecordType::Txt);
        q.stop().await;
    }

    #[tokio::test]
    async fn cached_answer_is_delivered_without_asking() {
        let (responder, mut sent) = Responder::detached(config());
        responder
            .handle_packet(&response(vec![a_rr("foo.local.", 1, 120)]), peer())
            .await
            .unwrap();

        let mut q = responder.start_query("foo.local", RecordType::A).await.unwrap();
        let answers = q.try_pop().unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].data, RecordData::A(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(answers[0].ttl, 120);
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn any_query_asks_despite_partial_cache() {
        let (responder, mut sent) = Responder::detached(config());
        responder
            .handle_packet(
                &response(vec![RR::new(
                    n("printer._http._tcp.local."),
                    120,
                    RecordData::Txt(vec!["path=/".into()]),
                )]),
                peer(),
            )
            .await
            .unwrap();

        let mut q = responder
            .start_query("printer._http._tcp.local", RecordType::Any)
            .await
            .unwrap();
        assert_eq!(q.try_pop().unwrap()[0].rtype(), RecordType::Txt);
        let msg = multicast(sent.try_recv().unwrap());
        assert!(msg.has_question(&n("printer._http._tcp.local"), RecordType::Any));
        assert!(responder
            .lock()
            .await
            .cache
            .is_asked(&n("printer._http._tcp.local"), RecordType::Any));
        q.stop().await;
    }

    #[tokio::test]
    async fn first_query_asks_once() {
        let (responder, mut sent) = Responder::detached(config());
        let q1 = responder.start_query("foo.local", RecordType::A).await.unwrap();
        let msg = multicast(sent.try_recv().unwrap());
        assert!(msg.is_query());
        assert!(msg.has_question(&n("foo.local"), RecordType::A));

        let q2 = responder.start_query("foo.local", RecordType::A).await.unwrap();
        assert!(sent.try_recv().is_err());
        q1.stop().await;
        q2.stop().await;
        assert!(responder.lock().await.queries.is_empty());
    }

    #[tokio::test]
    async fn duplicate_answers_are_not_pushed_again() {
        let (responder, _sent) = Responder::detached(config());
        let mut q = responder.start_query("foo.local", RecordType::Any).await.unwrap();
        let packet = response(vec![a_rr("foo.local.", 1, 120)]);
        responder.handle_packet(&packet, peer()).await.unwrap();
        responder.handle_packet(&packet, peer()).await.unwrap();
        assert_eq!(q.pop().await.unwrap().len(), 1);
        assert!(q.try_pop().is_none());
    }

    #[tokio::test]
    async fn goodbye_is_delivered_once() {
        let (responder, _sent) = Responder::detached(config());
        let mut q = responder.start_query("foo.local", RecordType::A).await.unwrap();
        responder
            .handle_packet(&response(vec![a_rr("foo.local.", 1, 120)]), peer())
            .await
            .unwrap();
        let bye = response(vec![a_rr("foo.local.", 1, 0)]);
        responder.handle_packet(&bye, peer()).await.unwrap();
        responder.handle_packet(&bye, peer()).await.unwrap();

        assert_eq!(q.pop().await.unwrap()[0].ttl, 120);
        let goodbye = q.pop().await.unwrap();
        assert!(goodbye[0].is_goodbye());
        assert!(goodbye[0].expiry() <= Instant::now() + Duration::from_secs(1));
        assert!(q.try_pop().is_none());
    }

    #[tokio::test]
    async fn record_back_after_goodbye_is_delivered() {
        let (responder, _sent) = Responder::detached(config());
        let mut q = responder.start_query("foo.local", RecordType::A).await.unwrap();
        for ttl in [120, 0, 120] {
            responder
                .handle_packet(&response(vec![a_rr("foo.local.", 1, ttl)]), peer())
                .await
                .unwrap();
        }
        let mut ttls = Vec::new();
        while let Some(answers) = q.try_pop() {
            ttls.extend(answers.iter().map(|a| a.ttl));
        }
        assert_eq!(ttls, vec![120, 0, 120]);
    }

    #[tokio::test]
    async fn earlier_refresh_wakes_the_cacher() {
        let (responder, _sent) = Responder::detached(config());
        let _q = responder.start_query("*", RecordType::Any).await.unwrap();
        let far = Instant::now() + Duration::from_secs(3600);
        responder.lock().await.waketime = Some(far);

        // refresh at 80% of 10s is well before the scheduled wake
        responder
            .handle_packet(&response(vec![a_rr("foo.local.", 1, 10)]), peer())
            .await
            .unwrap();
        for _ in 0..100 {
            if responder.lock().await.waketime != Some(far) {
                break;
            }
            tokio::task::yield_now().await;
        }
        let waketime = responder.lock().await.waketime.unwrap();
        assert!(waketime < far);
        assert!(waketime <= Instant::now() + Duration::from_secs(8));
    }

    #[tokio::test]
    async fn later_refresh_leaves_the_cacher_asleep() {
        let (responder, _sent) = Responder::detached(config());
        let _q = responder.start_query("*", RecordType::Any).await.unwrap();
        let soon = Instant::now() + Duration::from_secs(5);
        responder.lock().await.waketime = Some(soon);

        responder
            .handle_packet(&response(vec![a_rr("foo.local.", 1, 3600)]), peer())
            .await
            .unwrap();
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(responder.lock().await.waketime, Some(soon));
    }

    #[tokio::test]
    async fn service_announces_and_answers() {
        let (responder, mut sent) = Responder::detached(config());
        let svc = Service::new("printer", "_http._tcp", 9100)
            .unwrap()
            .domain("local")
            .unwrap()
            .txt("path", "/");
        let handle = responder.start_service(svc).await.unwrap();
        assert_eq!(handle.instance().to_string(), "printer._http._tcp.local.");

        let announce = multicast(sent.try_recv().unwrap());
        assert!(announce.is_response());
        assert_eq!(announce.answers[0].name, n("_http._tcp.local"));
        assert_eq!(
            announce.answers[0].data,
            RecordData::Ptr(n("printer._http._tcp.local"))
        );
        let types: Vec<_> = announce.answers.iter().map(RR::rtype).collect();
        assert!(types.contains(&RecordType::Srv));
        assert!(types.contains(&RecordType::Txt));

        let mut query = Message::query();
        query.add_question(n("printer._http._tcp.local."), RecordType::Any);
        responder
            .handle_packet(&query.encode().unwrap(), peer())
            .await
            .unwrap();
        let reply = multicast(sent.try_recv().unwrap());
        assert_eq!(reply.id, 0);
        assert!(reply.questions.is_empty());
        let types: Vec<_> = reply.answers.iter().map(RR::rtype).collect();
        assert_eq!(types, vec![RecordType::Srv, RecordType::Txt]);
        assert_eq!(reply.additional.len(), 1);
        assert_eq!(reply.additional[0].name, n("ensemble.local"));
        assert_eq!(
            reply.additional[0].data,
            RecordData::A(Ipv4Addr::new(10, 0, 0, 9))
        );
        assert!(sent.try_recv().is_err());

        handle.stop().await;
        responder
            .handle_packet(&query.encode().unwrap(), peer())
            .await
            .unwrap();
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn known_answers_are_suppressed() {
        let (responder, mut sent) = Responder::detached(config());
        let svc = Service::new("printer", "_http._tcp", 9100).unwrap();
        let _handle = responder.start_service(svc).await.unwrap();
        let _ = sent.try_recv();

        let ptr = RR::new(
            n("_http._tcp.local."),
            0,
            RecordData::Ptr(n("printer._http._tcp.local.")),
        );
        let ask = |known_ttl: u32| {
            let mut query = Message::query();
            query.add_question(n("_http._tcp.local."), RecordType::Ptr);
            query.add_answer(RR {
                ttl: known_ttl,
                ..ptr.clone()
            });
            query.encode().unwrap()
        };

        // more than half of 7200 left: nothing to say
        responder.handle_packet(&ask(3601), peer()).await.unwrap();
        assert!(sent.try_recv().is_err());

        // exactly half is not enough
        responder.handle_packet(&ask(3600), peer()).await.unwrap();
        let reply = multicast(sent.try_recv().unwrap());
        assert_eq!(reply.answers.len(), 1);
    }

    #[tokio::test]
    async fn legacy_unicast_gets_direct_reply() {
        let (responder, mut sent) = Responder::detached(config());
        let svc = Service::new("printer", "_http._tcp", 9100).unwrap();
        let _handle = responder.start_service(svc).await.unwrap();
        let _ = sent.try_recv();

        let mut query = Message::query();
        query.id = 77;
        query.add_question(n("printer._http._tcp.local."), RecordType::Srv);
        let from: SocketAddr = "10.0.0.50:40000".parse().unwrap();
        responder
            .handle_packet(&query.encode().unwrap(), from)
            .await
            .unwrap();

        match sent.try_recv().unwrap() {
            SendCommand::Unicast(data, addr) => {
                assert_eq!(addr, from);
                let reply = Message::decode(&data).unwrap();
                assert_eq!(reply.id, 77);
                assert_eq!(reply.questions.len(), 1);
            }
            other => panic!("expected unicast, got {:?}", other),
        }
        assert_eq!(multicast(sent.try_recv().unwrap()).id, 0);
    }

    #[tokio::test]
    async fn unicast_questions_are_ignored() {
        let (responder, mut sent) = Responder::detached(config());
        let svc = Service::new("printer", "_http._tcp", 9100).unwrap();
        let _handle = responder.start_service(svc).await.unwrap();
        let _ = sent.try_recv();

        let mut query = Message::query();
        query.questions.push(QuestionEntry {
            name: n("printer._http._tcp.local."),
            rtype: RecordType::Any,
            unicast: true,
        });
        responder
            .handle_packet(&query.encode().unwrap(), peer())
            .await
            .unwrap();
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn questions_from_others_count_own_do_not() {
        let (responder, mut sent) = Responder::detached(config());
        let q = responder.start_query("foo.local", RecordType::A).await.unwrap();
        let own_question = match sent.try_recv().unwrap() {
            SendCommand::Multicast(data) => data,
            other => panic!("expected multicast, got {:?}", other),
        };
        let own: SocketAddr = "10.0.0.9:5353".parse().unwrap();
        responder.handle_packet(&own_question, own).await.unwrap();
        let retries = responder.lock().await.cache.question(&n("foo.local"), RecordType::A).map(|q| q.retries);
        assert_eq!(retries, Some(0));

        responder.handle_packet(&own_question, peer()).await.unwrap();
        let retries = responder.lock().await.cache.question(&n("foo.local"), RecordType::A).map(|q| q.retries);
        assert_eq!(retries, Some(1));
        q.stop().await;
    }

    #[tokio::test]
    async fn garbage_is_dropped() {
        let (responder, mut sent) = Responder::detached(config());
        responder.handle_packet(&[1, 2, 3], peer()).await.unwrap();
        assert!(sent.try_recv().is_err());
        assert_eq!(responder.lock().await.cache.answer_count(), 0);
    }

    #[tokio::test]
    async fn dropped_query_is_pruned() {
        let (responder, _sent) = Responder::detached(config());
        let q = responder.start_query("*", RecordType::Any).await.unwrap();
        drop(q);
        responder
            .handle_packet(&response(vec![a_rr("foo.local.", 1, 120)]), peer())
            .await
            .unwrap();
        assert!(responder.lock().await.queries.is_empty());
    }
}
