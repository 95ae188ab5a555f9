//! Entry point for `framed-stream`.
//!
//! A minimal line-based demo: one side listens, the other connects, and
//! every line typed on stdin is sent to the peer.  `/sendfile <path>` sends a
//! file instead.  All protocol work lives in the library; `main.rs` owns only
//! process setup (logging, argument parsing, configuration).

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

use framed_stream::{
    Connection, Destination, Incoming, SessionHandle, TransportConfig, TransportError,
};

/// Reliable, congestion-controlled stream over a framed TCP channel.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Our name on the wire.
    #[arg(long, default_value = "alice")]
    name: String,

    /// The peer's name on the wire.
    #[arg(long, default_value = "bob")]
    peer: String,

    /// JSON file with transport settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the maximum segment size.
    #[arg(long)]
    mss: Option<u32>,

    /// Override the retransmission timeout, in milliseconds.
    #[arg(long)]
    rto_ms: Option<u64>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Wait for one incoming connection.
    Listen {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: String,
    },
    /// Connect to a listening peer.
    Connect {
        /// Remote address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let conn = match &cli.mode {
        Mode::Listen { bind } => {
            let listener = TcpListener::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            log::info!("Listening on {bind} as {}", cli.name);
            let (stream, addr) = listener.accept().await?;
            log::info!("Accepted connection from {addr}");
            Connection::from_stream(stream, &cli.name, &cli.peer, config)?
        }
        Mode::Connect { server } => {
            log::info!("Connecting to {server} as {}", cli.name);
            Connection::connect(server.as_str(), &cli.name, &cli.peer, config)
                .await
                .with_context(|| format!("connecting to {server}"))?
        }
    };

    chat(conn.run()?, &cli.peer).await
}

fn load_config(cli: &Cli) -> anyhow::Result<TransportConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            TransportConfig::from_json(&text)?
        }
        None => TransportConfig::default(),
    };
    if let Some(mss) = cli.mss {
        config = TransportConfig {
            retransmit_timeout: config.retransmit_timeout,
            max_frame_len: config.max_frame_len,
            self_clocked_acks: config.self_clocked_acks,
            ..TransportConfig::with_mss(mss)
        };
    }
    if let Some(ms) = cli.rto_ms {
        config.retransmit_timeout = std::time::Duration::from_millis(ms);
    }
    config.validate()?;
    Ok(config)
}

async fn chat(mut handle: SessionHandle, peer: &str) -> anyhow::Result<()> {
    let destination = Destination::Peer(peer.to_owned());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Some(path) = line.strip_prefix("/sendfile ") {
                        let path = path.trim();
                        let (name, data) = match read_file(path).await {
                            Ok(file) => file,
                            Err(e) => {
                                println!("* cannot read {path}: {e}");
                                continue;
                            }
                        };
                        match handle.send_file(name, data, destination.clone()).await {
                            Ok(id) => println!("* sending {path} as transfer {id}"),
                            Err(
                                e @ (TransportError::Transfer(_)
                                | TransportError::SequenceExhausted { .. }),
                            ) => println!("* cannot send {path}: {e}"),
                            Err(e) => return Err(e.into()),
                        }
                    } else {
                        handle.write(line.into_bytes(), destination.clone()).await?;
                    }
                }
                None => {
                    log::info!("stdin closed; waiting for outstanding data");
                    handle.flush().await?;
                    break;
                }
            },

            incoming = handle.recv() => match incoming {
                Ok(Incoming::Data { from, payload, .. }) => {
                    println!("<{from}> {}", String::from_utf8_lossy(&payload));
                }
                Ok(Incoming::File(file)) => {
                    println!(
                        "* received {} ({} bytes) from {}",
                        file.name,
                        file.data.len(),
                        file.from
                    );
                }
                Err(TransportError::Eof) => {
                    println!("* {peer} closed the connection");
                    break;
                }
                Err(e @ TransportError::SequenceExhausted { .. }) => {
                    println!("* message not sent: {e}");
                }
                Err(e) => return Err(e.into()),
            },
        }
    }

    handle.close().await;
    Ok(())
}

/// Read a file for `/sendfile`, returning its base name and contents.
async fn read_file(path: &str) -> std::io::Result<(String, Vec<u8>)> {
    let data = tokio::fs::read(path).await?;
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned());
    Ok((name, data))
}
