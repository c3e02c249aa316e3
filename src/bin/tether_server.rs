use std::{error::Error, net::SocketAddr, sync::Arc};

use clap::Parser;
use log::info;
use tether::{
    ServerConfig,
    config::{DEFAULT_PORT, DEFAULT_PROTOCOL_VERSION},
    message::MessageObject,
    protocol::{Credentials, DEFAULT_WORKERS, MessageServer, Router},
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for new connections at address
    #[arg(default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    address: SocketAddr,
    /// Account allowed to log in, as user:passphrase (repeatable)
    #[arg(long = "user")]
    users: Vec<Credentials>,
    /// Connections served concurrently
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
    /// Protocol version clients must present at login
    #[arg(long = "protocol", default_value = DEFAULT_PROTOCOL_VERSION)]
    protocol_version: String,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        ServerConfig {
            address: cli.address,
            protocol_version: cli.protocol_version,
            workers: cli.workers,
            users: cli.users,
        }
    }
}

fn router(config: &ServerConfig) -> Router {
    Router::with_sessions(Arc::new(config.sessions()))
        .route("ECHO", |request| {
            let mut reply = MessageObject::new("ECHOED")?;
            for (key, value) in request.iter() {
                reply.set(key, value.clone())?;
            }
            Ok(reply.into())
        })
        .route_authenticated("WHOAMI", |caller, _| {
            Ok(MessageObject::new("YOU")?
                .with("user", caller.user.as_str())?
                .into())
        })
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = ServerConfig::from(Cli::parse());
    if config.users.is_empty() {
        info!("no users configured; LOGIN will always fail");
    }

    let server = MessageServer::builder(router(&config))
        .workers(config.workers)
        .bind(config.address)?;

    let handle = server.shutdown_handle();
    ctrlc::set_handler(move || handle.shutdown())?;

    server.wait();
    Ok(())
}
