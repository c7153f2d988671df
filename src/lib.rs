//! Multicast DNS responder and resolver
//!
//! This library discovers names and services on the local link and advertises local services
//! using multicast DNS (DNS-SD). Library uses asynchronous Rust and depends on Tokio.
//! Following are main parts of api:
//! - [Responder](responder::Responder) - owns the multicast socket and the cache of answers seen on the link.
//!                             Answers questions for registered services and keeps subscribed records fresh.
//! - [Query](query::Query) - subscription to answers for a name and record type. [BackgroundQuery](query::BackgroundQuery)
//!                   hands the answers to a handler on its own task.
//! - [Service](service::Service) - description of a local service instance. Started on the responder it is announced
//!                     once and answers questions for its PTR, SRV and TXT records.
//! - [Resolver](resolve::Resolver) - `.local` name and link-local address lookups bounded by a timeout.
//! - [dnssd](dnssd) - browse for service instances, resolve them to host and port, register one.
//! - [message](message) - DNS message encoder and decoder.
//! - [config](config) - responder settings, loadable from JSON.
//!
//! Demos directory contains small programs watching the link, registering a service and resolving names.
//!
//! Example how to watch everything announced on the link:
//! ```no_run
//! # use mdns_responder::responder::Responder;
//! # use mdns_responder::config::ResponderConfig;
//! # use mdns_responder::message::RecordType;
//! # use anyhow::Result;
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let responder = Responder::new(ResponderConfig::default()).await?;
//! let mut query = responder.start_query("*", RecordType::Any).await?;
//! while let Some(answers) = query.pop().await {
//!     for an in answers {
//!         println!("{}", an);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Example how to advertise a web server:
//! ```no_run
//! # use mdns_responder::responder::Responder;
//! # use mdns_responder::config::ResponderConfig;
//! # use mdns_responder::service::Service;
//! # use anyhow::Result;
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let responder = Responder::new(ResponderConfig::default()).await?;
//! let service = Service::new("printer", "_http._tcp", 9100)?.txt("path", "/");
//! let handle = responder.start_service(service).await?;
//! tokio::time::sleep(std::time::Duration::from_secs(600)).await;
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! Example resolving a host:
//! ```no_run
//! # use mdns_responder::responder::Responder;
//! # use mdns_responder::config::ResponderConfig;
//! # use mdns_responder::resolve::Resolver;
//! # use anyhow::Result;
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let responder = Responder::new(ResponderConfig::default()).await?;
//! let resolver = Resolver::new(responder);
//! println!("{}", resolver.address("ensemble").await?);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod dnssd;
pub mod message;
pub mod name;
pub mod query;
pub mod record;
pub mod resolve;
pub mod responder;
mod scheduler;
pub mod service;
pub mod transport;

pub use message::{RecordData, RecordType};
pub use name::Name;
pub use record::Answer;
