//! DNS-SD service advertisement: record building and answering questions.
//!
//! A registered service answers three kinds of question:
//! - `instance.type.domain` for SRV/TXT (ANY gets both), with the host address as glue
//! - `type.domain` for PTR to the instance, with SRV/TXT/host address as additional records
//! - `_services._dns-sd._udp.domain` for PTR to the service type

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::message::{Message, RecordData, RecordType, RR};
use crate::name::Name;
use crate::responder::Responder;
use crate::transport::Host;

pub const DEFAULT_SRV_TTL: u32 = 240;
pub const DEFAULT_PTR_TTL: u32 = 7200;
pub const DEFAULT_DOMAIN: &str = "local";
pub const SERVICES_ENUMERATION: &str = "_services._dns-sd._udp";

/// Description of a local service, configured before it is started.
#[derive(Debug, Clone)]
pub struct Service {
    name: Name,
    service_type: Name,
    domain: Name,
    port: u16,
    txt: Vec<(String, String)>,
    target: Option<Name>,
    ttl: Option<u32>,
    priority: u16,
    weight: u16,
}

impl Service {
    /// `name` is the instance name and is used as a single label, so it may contain
    /// dots and spaces. `service_type` is e.g. `_http._tcp`.
    pub fn new(name: &str, service_type: &str, port: u16) -> Result<Self> {
        if name.is_empty() {
            anyhow::bail!("service instance name is empty");
        }
        let service_type = Name::parse(service_type.trim_end_matches('.'))?;
        if service_type.is_empty() {
            anyhow::bail!("service type is empty");
        }
        Ok(Self {
            name: Name::from_label(name)?,
            service_type,
            domain: Name::parse(DEFAULT_DOMAIN)?,
            port,
            txt: Vec::new(),
            target: None,
            ttl: None,
            priority: 0,
            weight: 0,
        })
    }

    /// Set a TXT key/value pair, replacing an earlier value for the same key.
    pub fn txt(mut self, key: &str, value: &str) -> Self {
        match self.txt.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_owned(),
            None => self.txt.push((key.to_owned(), value.to_owned())),
        }
        self
    }

    /// Host the SRV record points at. Without one the responder's own host is used and
    /// its address record is sent along as glue.
    pub fn target(mut self, host: &str) -> Result<Self> {
        let mut target = Name::parse(host)?;
        target.set_absolute(true);
        self.target = Some(target);
        Ok(self)
    }

    pub fn domain(mut self, domain: &str) -> Result<Self> {
        self.domain = Name::parse(domain.trim_start_matches('.'))?;
        Ok(self)
    }

    /// TTL for all records. By default SRV/TXT use 240 seconds and PTR 7200.
    pub fn ttl(mut self, secs: u32) -> Self {
        self.ttl = Some(secs);
        self
    }

    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn weight(mut self, weight: u16) -> Self {
        self.weight = weight;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn domain_name(&self) -> Name {
        let mut domain = self.domain.clone();
        domain.set_absolute(true);
        domain
    }

    /// `type.domain.`
    pub fn type_name(&self) -> Result<Name> {
        self.service_type.join(&self.domain_name())
    }

    /// `name.type.domain.`
    pub fn instance_name(&self) -> Result<Name> {
        self.name.join(&self.type_name()?)
    }

    pub(crate) fn register(
        self,
        id: u64,
        host: Option<&Host>,
        host_ttl: u32,
    ) -> Result<RegisteredService> {
        let (target, host_rr) = match (&self.target, host) {
            (Some(target), _) => (target.clone(), None),
            (None, Some(host)) => (
                host.name.clone(),
                Some(RR::new(host.name.clone(), host_ttl, RecordData::A(host.addr))),
            ),
            (None, None) => {
                anyhow::bail!("service {} has no target and the local host is unknown", self)
            }
        };
        let type_name = self.type_name()?;
        let instance = self.instance_name()?;
        let enumeration = Name::parse(SERVICES_ENUMERATION)?.join(&self.domain_name())?;
        let strings = self
            .txt
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        Ok(RegisteredService {
            id,
            srv_ttl: self.ttl.unwrap_or(DEFAULT_SRV_TTL),
            ptr_ttl: self.ttl.unwrap_or(DEFAULT_PTR_TTL),
            enum_ptr: RecordData::Ptr(type_name.clone()),
            ptr: RecordData::Ptr(instance.clone()),
            srv: RecordData::Srv {
                priority: self.priority,
                weight: self.weight,
                port: self.port,
                target,
            },
            txt: RecordData::Txt(strings),
            host: host_rr,
            type_name,
            instance,
            enumeration,
        })
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}:{}", self.name, self.service_type, self.domain, self.port)
    }
}

/// A started service as held by the responder.
#[derive(Debug, Clone)]
pub(crate) struct RegisteredService {
    pub id: u64,
    pub instance: Name,
    pub type_name: Name,
    pub enumeration: Name,
    pub srv_ttl: u32,
    pub ptr_ttl: u32,
    pub ptr: RecordData,
    pub enum_ptr: RecordData,
    pub srv: RecordData,
    pub txt: RecordData,
    pub host: Option<RR>,
}

impl RegisteredService {
    fn srv_rr(&self) -> RR {
        RR::new(self.instance.clone(), self.srv_ttl, self.srv.clone())
    }

    fn txt_rr(&self) -> RR {
        RR::new(self.instance.clone(), self.srv_ttl, self.txt.clone())
    }

    fn ptr_rr(&self) -> RR {
        RR::new(self.type_name.clone(), self.ptr_ttl, self.ptr.clone())
    }

    fn add_host(&self, msg: &mut Message) {
        if let Some(host) = &self.host {
            msg.add_additional(host.clone());
        }
    }

    /// Add whatever this service knows about (name, rtype) to `msg`.
    pub fn answer_question(&self, name: &Name, rtype: RecordType, msg: &mut Message) {
        if *name == self.instance {
            match rtype {
                RecordType::Any => {
                    msg.add_question(name.clone(), rtype);
                    msg.add_answer(self.srv_rr());
                    msg.add_answer(self.txt_rr());
                    self.add_host(msg);
                }
                RecordType::Srv => {
                    msg.add_question(name.clone(), rtype);
                    msg.add_answer(self.srv_rr());
                    self.add_host(msg);
                }
                RecordType::Txt => {
                    msg.add_question(name.clone(), rtype);
                    msg.add_answer(self.txt_rr());
                }
                RecordType::A | RecordType::Aaaa | RecordType::Ptr | RecordType::Other(_) => {}
            }
        } else if *name == self.type_name {
            match rtype {
                RecordType::Any | RecordType::Ptr => {
                    msg.add_question(name.clone(), rtype);
                    msg.add_answer(self.ptr_rr());
                    msg.add_additional(self.srv_rr());
                    msg.add_additional(self.txt_rr());
                    self.add_host(msg);
                }
                RecordType::A
                | RecordType::Aaaa
                | RecordType::Srv
                | RecordType::Txt
                | RecordType::Other(_) => {}
            }
        } else if *name == self.enumeration {
            match rtype {
                RecordType::Any | RecordType::Ptr => {
                    msg.add_question(name.clone(), rtype);
                    msg.add_answer(RR::new(
                        self.enumeration.clone(),
                        self.ptr_ttl,
                        self.enum_ptr.clone(),
                    ));
                }
                RecordType::A
                | RecordType::Aaaa
                | RecordType::Srv
                | RecordType::Txt
                | RecordType::Other(_) => {}
            }
        }
    }

    /// Records multicast once when the service starts.
    pub fn announcements(&self) -> Vec<RR> {
        let mut rrs = vec![self.ptr_rr(), self.srv_rr(), self.txt_rr()];
        rrs.extend(self.host.clone());
        rrs
    }
}

/// Handle to a started service. Dropping it leaves the service registered.
pub struct ServiceHandle {
    id: u64,
    instance: Name,
    responder: Arc<Responder>,
}

impl ServiceHandle {
    pub(crate) fn new(id: u64, instance: Name, responder: Arc<Responder>) -> Self {
        Self {
            id,
            instance,
            responder,
        }
    }

    pub fn instance(&self) -> &Name {
        &self.instance
    }

    /// Stop answering for the service. No goodbye is sent, peers let the records expire.
    pub async fn stop(self) {
        self.responder.service_stop(self.id).await;
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service {}", self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn n(s: &str) -> Name {
        Name::parse(s).unwrap()
    }

    fn host() -> Host {
        Host {
            name: n("ensemble.local."),
            addr: Ipv4Addr::new(10, 0, 0, 9),
        }
    }

    fn printer() -> RegisteredService {
        Service::new("printer", "_http._tcp", 9100)
            .unwrap()
            .txt("path", "/")
            .register(1, Some(&host()), 240)
            .unwrap()
    }

    #[test]
    fn names_and_defaults() {
        let svc = printer();
        assert_eq!(svc.instance.to_string(), "printer._http._tcp.local.");
        assert_eq!(svc.type_name.to_string(), "_http._tcp.local.");
        assert_eq!(svc.enumeration.to_string(), "_services._dns-sd._udp.local.");
        assert_eq!(svc.srv_ttl, DEFAULT_SRV_TTL);
        assert_eq!(svc.ptr_ttl, DEFAULT_PTR_TTL);
        assert_eq!(svc.txt, RecordData::Txt(vec!["path=/".to_owned()]));
    }

    #[test]
    fn overrides_before_start() {
        let svc = Service::new("Sam's Printer", "_ipp._tcp", 631)
            .unwrap()
            .domain("example.org")
            .unwrap()
            .ttl(10)
            .priority(3)
            .weight(7)
            .target("spool.example.org")
            .unwrap()
            .register(1, Some(&host()), 240)
            .unwrap();
        assert_eq!(svc.instance.labels()[0], "Sam's Printer");
        assert_eq!(svc.type_name.to_string(), "_ipp._tcp.example.org.");
        assert_eq!(svc.srv_ttl, 10);
        assert_eq!(svc.ptr_ttl, 10);
        assert_eq!(
            svc.srv,
            RecordData::Srv {
                priority: 3,
                weight: 7,
                port: 631,
                target: n("spool.example.org."),
            }
        );
        // explicit target: no glue
        assert!(svc.host.is_none());
    }

    #[test]
    fn txt_keys_replace() {
        let svc = Service::new("x", "_http._tcp", 80)
            .unwrap()
            .txt("path", "/a")
            .txt("path", "/b")
            .register(1, Some(&host()), 240)
            .unwrap();
        assert_eq!(svc.txt, RecordData::Txt(vec!["path=/b".to_owned()]));
    }

    #[test]
    fn no_target_without_host() {
        let err = Service::new("x", "_http._tcp", 80).unwrap().register(1, None, 240);
        assert!(err.is_err());
        assert!(Service::new("", "_http._tcp", 80).is_err());
    }

    #[test]
    fn answers_instance_questions() {
        let svc = printer();
        let mut msg = Message::response();
        svc.answer_question(&n("PRINTER._http._tcp.local"), RecordType::Any, &mut msg);
        let types: Vec<_> = msg.answers.iter().map(RR::rtype).collect();
        assert_eq!(types, vec![RecordType::Srv, RecordType::Txt]);
        assert_eq!(msg.additional.len(), 1);
        assert_eq!(msg.additional[0].data, RecordData::A(Ipv4Addr::new(10, 0, 0, 9)));

        let mut msg = Message::response();
        svc.answer_question(&n("printer._http._tcp.local"), RecordType::Txt, &mut msg);
        assert_eq!(msg.answers.len(), 1);
        assert!(msg.additional.is_empty());

        let mut msg = Message::response();
        svc.answer_question(&n("printer._http._tcp.local"), RecordType::A, &mut msg);
        assert!(msg.answers.is_empty());
        assert!(msg.questions.is_empty());
    }

    #[test]
    fn answers_type_and_enumeration() {
        let svc = printer();
        let mut msg = Message::response();
        svc.answer_question(&n("_http._tcp.local"), RecordType::Ptr, &mut msg);
        assert_eq!(msg.answers.len(), 1);
        assert_eq!(msg.answers[0].data, RecordData::Ptr(n("printer._http._tcp.local")));
        assert_eq!(msg.additional.len(), 3);

        let mut msg = Message::response();
        svc.answer_question(&n("_services._dns-sd._udp.local"), RecordType::Any, &mut msg);
        assert_eq!(msg.answers.len(), 1);
        assert_eq!(msg.answers[0].name, n("_services._dns-sd._udp.local"));
        assert_eq!(msg.answers[0].data, RecordData::Ptr(n("_http._tcp.local")));

        let mut msg = Message::response();
        svc.answer_question(&n("_ipp._tcp.local"), RecordType::Ptr, &mut msg);
        assert!(msg.answers.is_empty());
    }

    #[test]
    fn announcement_records() {
        let rrs = printer().announcements();
        let types: Vec<_> = rrs.iter().map(RR::rtype).collect();
        assert_eq!(
            types,
            vec![RecordType::Ptr, RecordType::Srv, RecordType::Txt, RecordType::A]
        );
        assert_eq!(rrs[0].name, n("_http._tcp.local"));
    }
}
