use std::{net::Ipv4Addr, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand};
use mdns_responder::{
    config::ResponderConfig,
    dnssd,
    message::RecordType,
    resolve::Resolver,
    responder::Responder,
    service::Service,
};

#[derive(Parser, Debug)]
#[command()]
struct Cli {
    #[clap(long)]
    #[arg(global = true, default_value_t = false)]
    verbose: bool,

    /// JSON responder config, defaults are used for missing fields
    #[clap(long)]
    #[arg(global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every answer seen on the link
    Watch {},
    /// Query name and type, print answers as they arrive
    Query {
        name: String,
        #[clap(long)]
        #[arg(default_value_t = String::from("ANY"))]
        rtype: String,
    },
    /// Advertise a service until the timeout expires
    Register {
        name: String,
        service_type: String,
        port: u16,
        /// key=value pairs for the TXT record
        txt: Vec<String>,
        #[clap(long)]
        #[arg(default_value_t = 600)]
        timeout: u64,
    },
    /// Report instances of a service type as they come and go
    Browse {
        service_type: String,
        #[clap(long)]
        #[arg(default_value_t = String::from("local"))]
        domain: String,
    },
    /// Print host, port and TXT of a service instance
    ResolveService {
        name: String,
        service_type: String,
        #[clap(long)]
        #[arg(default_value_t = String::from("local"))]
        domain: String,
    },
    /// Resolve a .local host name
    Resolve {
        name: String,
    },
    /// Resolve a link-local address to host names
    Reverse {
        address: Ipv4Addr,
    },
    /// Write the default config to a file
    SaveConfig {
        path: String,
    },
}

fn parse_rtype(s: &str) -> Result<RecordType> {
    Ok(match s.to_ascii_uppercase().as_str() {
        "A" => RecordType::A,
        "AAAA" => RecordType::Aaaa,
        "PTR" => RecordType::Ptr,
        "SRV" => RecordType::Srv,
        "TXT" => RecordType::Txt,
        "ANY" => RecordType::Any,
        other => RecordType::from(other.parse::<u16>()?),
    })
}

async fn run(config: ResponderConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Watch {} => {
            let responder = Responder::new(config).await?;
            let mut query = responder.start_query("*", RecordType::Any).await?;
            while let Some(answers) = query.pop().await {
                for an in answers {
                    println!("{}", an);
                }
            }
        }
        Commands::Query { name, rtype } => {
            let responder = Responder::new(config).await?;
            let bq = responder
                .start_background_query(&name, parse_rtype(&rtype)?, |q, answers| {
                    for an in answers {
                        println!("{} -> {}", q, an);
                    }
                    Ok(())
                })
                .await?;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            bq.stop().await;
        }
        Commands::Register {
            name,
            service_type,
            port,
            txt,
            timeout,
        } => {
            let responder = Responder::new(config).await?;
            let mut service = Service::new(&name, &service_type, port)?;
            for kv in &txt {
                let (k, v) = kv.split_once('=').unwrap_or((kv.as_str(), ""));
                service = service.txt(k, v);
            }
            let handle = responder.start_service(service).await?;
            println!("registered {}", handle);
            tokio::time::sleep(Duration::from_secs(timeout)).await;
            handle.stop().await;
        }
        Commands::Browse {
            service_type,
            domain,
        } => {
            let responder = Responder::new(config).await?;
            let bq = dnssd::browse(&responder, &service_type, &domain, |reply| {
                println!("{}", reply);
                Ok(())
            })
            .await?;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            bq.stop().await;
        }
        Commands::ResolveService {
            name,
            service_type,
            domain,
        } => {
            let responder = Responder::new(config).await?;
            let bq = dnssd::resolve(&responder, &name, &service_type, &domain, |reply| {
                println!("{}", reply);
                Ok(())
            })
            .await?;
            tokio::time::sleep(Duration::from_secs(10)).await;
            bq.stop().await;
        }
        Commands::Resolve { name } => {
            let responder = Responder::new(config).await?;
            let resolver = Resolver::new(responder);
            for addr in resolver.addresses(&name).await? {
                println!("{} {}", name, addr);
            }
        }
        Commands::Reverse { address } => {
            let responder = Responder::new(config).await?;
            let resolver = Resolver::new(responder);
            for name in resolver.names(address).await? {
                println!("{} {}", address, name);
            }
        }
        Commands::SaveConfig { path } => {
            config.save(&path)?;
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let log_level = {
        if cli.verbose {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Error
        }
    };
    env_logger::Builder::new()
        .parse_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(log_level)
        .format_line_number(true)
        .format_file(true)
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    let config = match &cli.config {
        Some(path) => ResponderConfig::load(path).unwrap(),
        None => ResponderConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    if let Err(e) = runtime.block_on(run(config, cli.command)) {
        log::error!("{:?}", e);
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
}
