//! DNS service discovery on top of queries and services.
//!
//! - [browse] follows the PTR records of a service type and reports instances as they
//!   appear and go.
//! - [resolve] follows one instance and reports its SRV and TXT once both are known.
//! - [register] advertises an instance of the local host.
//!
//! Browse and resolve run as [BackgroundQuery], the handler is called on the query's
//! task. Call [BackgroundQuery::stop] once enough replies have been seen.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::message::{RecordData, RecordType};
use crate::name::Name;
use crate::query::BackgroundQuery;
use crate::record::Answer;
use crate::responder::Responder;
use crate::service::{Service, ServiceHandle};

/// Parts of `[instance.]_service._proto.domain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceName {
    pub instance: Option<String>,
    /// `_service._proto`
    pub service_type: String,
    pub domain: String,
}

/// Split a DNS-SD name. Labels before the instance label are ignored.
pub fn parse_name(name: &Name) -> Result<ServiceName> {
    let mut labels = name.labels().iter().rev();
    let (Some(domain), Some(proto), Some(service)) = (labels.next(), labels.next(), labels.next())
    else {
        anyhow::bail!("{} is not a service name", name);
    };
    Ok(ServiceName {
        instance: labels.next().cloned(),
        service_type: format!("{}.{}", service, proto),
        domain: domain.clone(),
    })
}

/// Decode TXT strings into key/value pairs.
///
/// Keys are printable ASCII without `=` and are lowercased. A string without `=` maps to
/// `None`, `key=` to an empty value. Only the first occurrence of a key counts and
/// malformed strings are skipped.
pub fn parse_strings(strings: &[String]) -> BTreeMap<String, Option<String>> {
    let mut out = BTreeMap::new();
    for kv in strings {
        let (key, value) = match kv.split_once('=') {
            Some((k, v)) => (k, Some(v.to_owned())),
            None => (kv.as_str(), None),
        };
        if key.is_empty() || !key.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
            log::debug!("skip txt string {:?}", kv);
            continue;
        }
        out.entry(key.to_ascii_lowercase()).or_insert(value);
    }
    out
}

fn domain_name(domain: &str) -> Result<Name> {
    let mut name = Name::parse(domain.trim_matches('.'))?;
    name.set_absolute(true);
    Ok(name)
}

/// `[instance.]type.domain.`
fn service_name(instance: Option<&str>, service_type: &str, domain: &str) -> Result<Name> {
    let name = Name::parse(service_type.trim_matches('.'))?.join(&domain_name(domain)?)?;
    match instance {
        Some(instance) => Name::from_label(instance)?.join(&name),
        None => Ok(name),
    }
}

/// An instance seen while browsing.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseReply {
    /// `instance.type.domain.`
    pub fullname: Name,
    pub name: String,
    pub service_type: String,
    pub domain: String,
    pub ttl: u32,
}

impl BrowseReply {
    fn from_answer(an: &Answer) -> Option<Self> {
        let RecordData::Ptr(target) = &an.data else {
            return None;
        };
        let parsed = parse_name(target).ok()?;
        Some(Self {
            fullname: target.clone(),
            name: parsed.instance?,
            service_type: parsed.service_type,
            domain: parsed.domain,
            ttl: an.ttl,
        })
    }

    /// The instance said goodbye.
    pub fn removed(&self) -> bool {
        self.ttl == 0
    }
}

impl fmt::Display for BrowseReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.removed() { "removed" } else { "found" };
        write!(f, "{} {}", state, self.fullname)
    }
}

/// Look for instances of `service_type` (e.g. `_http._tcp`) in `domain`.
pub async fn browse<F>(
    responder: &Arc<Responder>,
    service_type: &str,
    domain: &str,
    mut handler: F,
) -> Result<BackgroundQuery>
where
    F: FnMut(BrowseReply) -> Result<()> + Send + 'static,
{
    let name = service_name(None, service_type, domain)?;
    BackgroundQuery::start_name(responder, name, RecordType::Ptr, move |q, answers| {
        for an in &answers {
            match BrowseReply::from_answer(an) {
                Some(reply) => handler(reply)?,
                None => log::debug!("{} ignores {}", q, an),
            }
        }
        Ok(())
    })
    .await
}

/// SRV and TXT of one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveReply {
    pub fullname: Name,
    pub name: String,
    pub service_type: String,
    pub domain: String,
    pub target: Name,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    pub text_record: BTreeMap<String, Option<String>>,
    /// TTL of the SRV record, 0 once the instance said goodbye.
    pub ttl: u32,
}

impl ResolveReply {
    fn new(srv: &Answer, txt: &Answer) -> Option<Self> {
        let RecordData::Srv {
            priority,
            weight,
            port,
            target,
        } = &srv.data
        else {
            return None;
        };
        let RecordData::Txt(strings) = &txt.data else {
            return None;
        };
        let parsed = parse_name(&srv.name).ok()?;
        Some(Self {
            fullname: srv.name.clone(),
            name: parsed.instance?,
            service_type: parsed.service_type,
            domain: parsed.domain,
            target: target.clone(),
            port: *port,
            priority: *priority,
            weight: *weight,
            text_record: parse_strings(strings),
            ttl: srv.ttl,
        })
    }
}

impl fmt::Display for ResolveReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.fullname, self.target, self.port)?;
        for (k, v) in &self.text_record {
            match v {
                Some(v) => write!(f, " {}={}", k, v)?,
                None => write!(f, " {}", k)?,
            }
        }
        Ok(())
    }
}

/// Follow the instance `name` of `service_type` in `domain`. The handler gets a reply
/// each time the SRV or TXT changes, once both have been seen.
pub async fn resolve<F>(
    responder: &Arc<Responder>,
    name: &str,
    service_type: &str,
    domain: &str,
    mut handler: F,
) -> Result<BackgroundQuery>
where
    F: FnMut(ResolveReply) -> Result<()> + Send + 'static,
{
    let fullname = service_name(Some(name), service_type, domain)?;
    let mut srv: Option<Answer> = None;
    let mut txt: Option<Answer> = None;
    BackgroundQuery::start_name(responder, fullname.clone(), RecordType::Any, move |_, answers| {
        let mut changed = false;
        for an in answers.into_iter().filter(|an| an.name == fullname) {
            match an.rtype() {
                RecordType::Srv => srv = Some(an),
                RecordType::Txt => txt = Some(an),
                _ => continue,
            }
            changed = true;
        }
        if !changed {
            return Ok(());
        }
        if let (Some(srv), Some(txt)) = (&srv, &txt) {
            if let Some(reply) = ResolveReply::new(srv, txt) {
                handler(reply)?;
            }
        }
        Ok(())
    })
    .await
}

/// What [register] advertised.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterReply {
    pub fullname: Name,
    pub name: String,
    pub service_type: String,
    pub domain: String,
}

/// Advertise instance `name` of `service_type` in `domain` on `port`. Stop the returned
/// handle to withdraw it.
pub async fn register(
    responder: &Arc<Responder>,
    name: &str,
    service_type: &str,
    domain: &str,
    port: u16,
    txt: &[(&str, &str)],
) -> Result<(ServiceHandle, RegisterReply)> {
    let mut service = Service::new(name, service_type, port)?.domain(domain)?;
    for (k, v) in txt {
        service = service.txt(k, v);
    }
    let handle = responder.start_service(service).await?;
    let reply = RegisterReply {
        fullname: handle.instance().clone(),
        name: name.to_owned(),
        service_type: service_type.to_owned(),
        domain: domain.to_owned(),
    };
    Ok((handle, reply))
}
