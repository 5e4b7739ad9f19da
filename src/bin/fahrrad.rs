
use fahrrad::advert::AdvertisementBuilder;
use fahrrad::config::Config;
use fahrrad::icmp6::{IncomingMessage, MessageKind, RouterAdvertisement};
use fahrrad::interface::Interface;
use fahrrad::responder::Responder;

use clap::{Parser, Subcommand};

use std::net::Ipv6Addr;
use std::path::PathBuf;


fn main() {
    env_logger::init();
    let args = Cli::parse();

    let config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration from {}: {}", args.config.display(), e);
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = rt.block_on(async move {
        match args.subcmd {
            Command::Start { interface } => start(config, interface).await,
            Command::Config => show_config(config).await,
            Command::Decode { hex } => decode(&hex),
        }
    });

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn start(config: Config, interface: Option<String>) -> fahrrad::Result<()> {
    log::debug!("Configuration: {:?}", config);

    let if_name = interface
        .or_else(|| config.global.interface.clone())
        .ok_or_else(|| fahrrad::Error::Config("no interface configured, set [global] interface or pass --interface".to_owned()))?;

    config.advertisement.check_prefix()?;

    let ra_config = fahrrad::store::load(config.store.as_ref()).await?;
    log::info!("Advertisement configuration: {:?}", ra_config);

    let interface = Interface::resolve(&if_name).await?;
    match interface.link_layer_address {
        Some(lla) => log::info!("{} (index {}): link-layer address {}", interface.if_name, interface.if_index, lla),
        None => log::info!("{} (index {}): advertising without a link-layer address", interface.if_name, interface.if_index),
    }

    let socket = fahrrad::icmp6::RawIcmp6Socket::open_ndp(interface.if_index)?.into_async()?;
    let builder = AdvertisementBuilder::new(ra_config, config.advertisement, interface.link_layer_address);

    Responder::new(socket, interface, builder).run().await
}

async fn show_config(config: Config) -> fahrrad::Result<()> {
    let ra_config = fahrrad::store::load(config.store.as_ref()).await?;
    println!("{:#?}", config);
    println!("{:#?}", ra_config);
    Ok(())
}

fn decode(hex: &str) -> fahrrad::Result<()> {
    let data = parse_hex(hex)?;
    let message = IncomingMessage::parse(Ipv6Addr::UNSPECIFIED, None, &data)?;
    println!("{:?}", message);

    if let Some(lla) = message.source_link_layer_address() {
        println!("source link-layer address: {}", lla);
    }
    if message.kind() == MessageKind::RouterAdvertisement {
        println!("{:?}", RouterAdvertisement::decode(&data)?);
    }
    Ok(())
}

fn parse_hex(hex: &str) -> fahrrad::Result<Vec<u8>> {
    let digits: Vec<u8> = hex.bytes().filter(|b| !b.is_ascii_whitespace() && *b != b':').collect();
    if digits.len() % 2 != 0 {
        return Err(fahrrad::Error::Config(format!("odd number of hex digits in {:?}", hex)));
    }

    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| fahrrad::Error::Config(format!("invalid hex in {:?}", hex)))
        })
        .collect()
}


/// IPv6 Router Advertisement responder
#[derive(Debug, Clone, Parser)]
#[clap(name = "fahrrad", version, about)]
pub struct Cli {
    /// Path to the configuration file
    #[clap(short, long, default_value = fahrrad::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub subcmd: Command,
}

#[derive(Debug, Clone, Subcommand)]
#[non_exhaustive]
pub enum Command {
    /// start the daemon
    Start {
        /// interface to answer on, overriding the configuration file
        #[clap(short, long)]
        interface: Option<String>,
    },

    /// bootstrap the configuration store and print the effective configuration
    Config,

    /// decode a hex-encoded ICMPv6 NDP message
    Decode {
        hex: String,
    },
}
