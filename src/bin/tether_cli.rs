use std::{error::Error, io, net::SocketAddr};

use clap::Parser;
use tether::{
    ClientConfig, Command,
    config::{DEFAULT_PORT, DEFAULT_PROTOCOL_VERSION},
    message::Message,
    prompt,
    protocol::{ClientError, MessageClient, Session},
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address
    #[arg(default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    address: SocketAddr,
    /// Protocol version presented at login
    #[arg(long = "protocol", default_value = DEFAULT_PROTOCOL_VERSION)]
    protocol_version: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ClientConfig {
        address: cli.address,
        protocol_version: cli.protocol_version,
    };
    let client = MessageClient::connect(config.address)?;
    let mut session: Option<Session> = None;

    let stdio = io::stdin();
    let stdout = io::stdout();

    loop {
        let cmd = match prompt(stdio.lock(), stdout.lock()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match cmd {
            Command::Exit => break,
            Command::Empty => {}
            Command::Ping => match client.ping() {
                Ok(()) => println!("PONG"),
                Err(e) => report(&e),
            },
            Command::Login { user, passphrase } => {
                match client.login(&user, &passphrase, &config.protocol_version) {
                    Ok(s) => {
                        println!("logged in as {}", s.user);
                        session = Some(s);
                    }
                    Err(e) => report(&e),
                }
            }
            Command::BeginBatch => match client.begin_batch() {
                Ok(()) => println!("collecting batch; '.send' to send, '.discard' to drop"),
                Err(e) => report(&e),
            },
            Command::EndBatch => {
                let sent = client.end_batch(|result| {
                    if let Err(e) = result {
                        report(&e);
                    }
                });
                if let Err(e) = sent {
                    report(&e);
                }
            }
            Command::CancelBatch => {
                if let Err(e) = client.cancel_batch() {
                    report(&e);
                }
            }
            Command::Send(message) => {
                let message = match sign(message, session.as_ref()) {
                    Ok(m) => m,
                    Err(e) => {
                        report(&e);
                        continue;
                    }
                };

                if client.is_batching() {
                    client.query_async(message, |reply| match reply {
                        Ok(reply) => println!("{reply}"),
                        Err(e) => report(&e),
                    });
                } else {
                    match client.query(message) {
                        Ok(reply) => println!("{reply}"),
                        Err(e) => report(&e),
                    }
                }
            }
        }
    }

    Ok(())
}

/// Stamps the session onto object messages that do not carry one yet.
fn sign(message: Message, session: Option<&Session>) -> Result<Message, ClientError> {
    match (message, session) {
        (Message::Object(mut object), Some(session)) if !object.contains("sessionId") => {
            session.authorize(&mut object)?;
            Ok(object.into())
        }
        (message, _) => Ok(message),
    }
}

fn report(error: &ClientError) {
    eprintln!("error: {error}");
}
