//! Name and address lookups that wait a bounded time for answers.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::time::Instant;

use crate::message::{RecordData, RecordType};
use crate::name::Name;
use crate::query::Query;
use crate::responder::Responder;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolves `.local` names and link-local reverse names through a [`Responder`].
#[derive(Clone)]
pub struct Resolver {
    responder: Arc<Responder>,
    timeout: Duration,
}

/// The name to ask for, or an error when `name` is not resolved over mDNS.
/// Single labels are looked up in `local`.
pub fn candidate_name(name: &str) -> Result<Name> {
    let parsed = Name::parse(name)?;
    let mut candidate = if !parsed.is_absolute() && parsed.len() == 1 {
        parsed.join(&Name::parse("local")?)?
    } else {
        parsed
    };
    let local = Name::parse("local")?;
    let link_local = Name::parse("254.169.in-addr.arpa")?;
    if candidate.is_empty()
        || !(candidate.is_subdomain_of(&local) || candidate.is_subdomain_of(&link_local))
    {
        bail!("{} is not resolved by mDNS", name);
    }
    candidate.set_absolute(true);
    Ok(candidate)
}

/// `d.c.b.a.in-addr.arpa.` for `a.b.c.d`.
pub fn reverse_name(addr: Ipv4Addr) -> Result<Name> {
    let o = addr.octets();
    let labels = [o[3], o[2], o[1], o[0]]
        .iter()
        .map(u8::to_string)
        .chain(["in-addr".to_owned(), "arpa".to_owned()])
        .collect();
    Name::new(labels, true)
}

impl Resolver {
    pub fn new(responder: Arc<Responder>) -> Self {
        Self {
            responder,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn collect(&self, name: Name, rtype: RecordType, first_only: bool) -> Result<Vec<RecordData>> {
        let mut query = Query::start_name(&self.responder, name, rtype).await?;
        let deadline = Instant::now() + self.timeout;
        let mut out = Vec::new();
        loop {
            let answers = tokio::select! {
                answers = query.pop() => answers,
                _ = tokio::time::sleep_until(deadline) => None,
            };
            let Some(answers) = answers else {
                break;
            };
            out.extend(answers.into_iter().filter(|a| !a.is_goodbye()).map(|a| a.data));
            if first_only && !out.is_empty() {
                break;
            }
        }
        query.stop().await;
        Ok(out)
    }

    /// All record data for (name, type) that arrives before the timeout.
    pub async fn resources(&self, name: &str, rtype: RecordType) -> Result<Vec<RecordData>> {
        self.collect(candidate_name(name)?, rtype, false).await
    }

    /// The first record data for (name, type).
    pub async fn resource(&self, name: &str, rtype: RecordType) -> Result<RecordData> {
        let found = self.collect(candidate_name(name)?, rtype, true).await?;
        match found.into_iter().next() {
            Some(data) => Ok(data),
            None => bail!("mDNS result has no information for {}", name),
        }
    }

    pub async fn addresses(&self, name: &str) -> Result<Vec<Ipv4Addr>> {
        let found = self.resources(name, RecordType::A).await?;
        Ok(found.into_iter().filter_map(address_of).collect())
    }

    pub async fn address(&self, name: &str) -> Result<Ipv4Addr> {
        match address_of(self.resource(name, RecordType::A).await?) {
            Some(addr) => Ok(addr),
            None => bail!("mDNS result has no information for {}", name),
        }
    }

    /// Names pointing back at `addr`. Only link-local addresses are resolved.
    pub async fn names(&self, addr: Ipv4Addr) -> Result<Vec<Name>> {
        let ptr = candidate_name(&reverse_name(addr)?.to_string())?;
        let found = self.collect(ptr, RecordType::Ptr, false).await?;
        Ok(found.into_iter().filter_map(name_of).collect())
    }

    pub async fn name(&self, addr: Ipv4Addr) -> Result<Name> {
        let ptr = candidate_name(&reverse_name(addr)?.to_string())?;
        let found = self.collect(ptr, RecordType::Ptr, true).await?;
        match found.into_iter().find_map(name_of) {
            Some(name) => Ok(name),
            None => bail!("mDNS result has no information for {}", addr),
        }
    }
}

fn address_of(data: RecordData) -> Option<Ipv4Addr> {
    match data {
        RecordData::A(addr) => Some(addr),
        _ => None,
    }
}

fn name_of(data: RecordData) -> Option<Name> {
    match data {
        RecordData::Ptr(name) => Some(name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponderConfig;
    use crate::message::{Message, RR};
    use crate::transport::SendCommand;
    use std::net::SocketAddr;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn n(s: &str) -> Name {
        Name::parse(s).unwrap()
    }

    fn responder() -> (Arc<Responder>, UnboundedReceiver<SendCommand>) {
        Responder::detached(ResponderConfig {
            hostname: Some("ensemble".to_owned()),
            host_address: Some(Ipv4Addr::new(10, 0, 0, 9)),
            ..ResponderConfig::default()
        })
    }

    async fn inject(responder: &Responder, rrs: Vec<RR>) {
        let mut msg = Message::response();
        for rr in rrs {
            msg.add_answer(rr);
        }
        let from: SocketAddr = "10.0.0.50:5353".parse().unwrap();
        responder.handle_packet(&msg.encode().unwrap(), from).await.unwrap();
    }

    #[test]
    fn candidates() {
        assert_eq!(candidate_name("ensemble").unwrap().to_string(), "ensemble.local.");
        assert_eq!(candidate_name("box.local").unwrap().to_string(), "box.local.");
        assert_eq!(
            candidate_name("5.1.254.169.in-addr.arpa").unwrap().to_string(),
            "5.1.254.169.in-addr.arpa."
        );
        assert!(candidate_name("example.com").is_err());
        assert!(candidate_name("ensemble.").is_err());
        assert!(candidate_name(".").is_err());
    }

    #[test]
    fn reverse() {
        assert_eq!(
            reverse_name(Ipv4Addr::new(169, 254, 1, 5)).unwrap().to_string(),
            "5.1.254.169.in-addr.arpa."
        );
    }

    #[tokio::test]
    async fn cached_address_resolves() {
        let (responder, _sent) = responder();
        inject(
            &responder,
            vec![RR::new(n("ensemble.local."), 120, RecordData::A(Ipv4Addr::new(10, 0, 0, 1)))],
        )
        .await;
        let resolver = Resolver::new(responder.clone()).with_timeout(Duration::from_millis(50));
        assert_eq!(resolver.address("ensemble").await.unwrap(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(
            resolver.addresses("ensemble.local").await.unwrap(),
            vec![Ipv4Addr::new(10, 0, 0, 1)]
        );
        assert!(responder.lock().await.queries.is_empty());
    }

    #[tokio::test]
    async fn nothing_arrives() {
        let (responder, mut sent) = responder();
        let resolver = Resolver::new(responder).with_timeout(Duration::from_millis(20));
        let err = resolver.address("nobody").await.unwrap_err();
        assert!(err.to_string().contains("no information"));
        // the question did go out
        assert!(matches!(sent.try_recv(), Ok(SendCommand::Multicast(_))));
    }

    #[tokio::test]
    async fn reverse_lookup() {
        let (responder, _sent) = responder();
        inject(
            &responder,
            vec![RR::new(
                n("5.1.254.169.in-addr.arpa."),
                120,
                RecordData::Ptr(n("ensemble.local.")),
            )],
        )
        .await;
        let resolver = Resolver::new(responder).with_timeout(Duration::from_millis(50));
        assert_eq!(
            resolver.name(Ipv4Addr::new(169, 254, 1, 5)).await.unwrap(),
            n("ensemble.local")
        );
        assert!(resolver.names(Ipv4Addr::new(10, 0, 0, 1)).await.is_err());
    }
}
