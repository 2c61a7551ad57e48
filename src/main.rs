//! Entry point for `rftp`.
//!
//! Parses CLI arguments and dispatches into either **send** or **receive**
//! mode.  All actual protocol work is delegated to library modules; `main.rs`
//! owns only process setup (logging, argument parsing) and the end-of-run
//! summary.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use rftp::receiver::{FileReceiver, ReceiverConfig};
use rftp::sender::{FileSender, SenderConfig};

/// Reliable, in-order file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a receiver.
    Send {
        /// Local address to bind (port 0 picks an ephemeral port).
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Receiver address (e.g. 192.168.1.7:9000).
        #[arg(short, long)]
        peer: SocketAddr,
        /// File to transfer.
        file: PathBuf,
    },
    /// Receive one file, then exit.
    Receive {
        /// Local address to listen on.
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Directory the received file is written to.
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set RUST_LOG to control verbosity, e.g. RUST_LOG=rftp=debug.
    env_logger::init();

    match Cli::parse().mode {
        Mode::Send { bind, peer, file } => {
            // Fail on a missing source before any packet goes out.
            anyhow::ensure!(file.is_file(), "no such file: {}", file.display());

            let mut sender = FileSender::bind(SenderConfig::new(bind, peer))
                .await
                .context("binding local socket")?;
            sender.connect().await.context("establishing connection")?;
            sender.send_file(&file).await.context("sending file")?;
            sender.disconnect().await.context("closing connection")?;

            let stats = sender.stats();
            log::info!(
                "sent {} bytes in {} packets, {} retransmissions",
                stats.bytes_sent,
                stats.packets_sent,
                stats.retransmissions
            );
        }
        Mode::Receive { bind, output_dir } => {
            let mut receiver = FileReceiver::bind(ReceiverConfig {
                bind_addr: bind,
                output_dir,
            })
            .await
            .context("binding local socket")?;
            receiver.run().await.context("receiving")?;

            let stats = receiver.stats();
            log::info!(
                "received {} payload bytes in {} packets",
                stats.bytes_received,
                stats.packets_received
            );
        }
    }

    Ok(())
}
