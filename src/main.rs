use std::time::Duration;

mod checksum;
mod config;
mod engine;
mod error;
mod header;
mod logging;
mod modifier;
mod monitor;
mod packet;

use clap::{Parser, Subcommand};
use nfq::{Message, Queue, Verdict as NfqVerdict};
use tracing::{error, info, warn};

use crate::{
    checksum::ChecksumMode,
    config::{EngineConfig, KeyArgs, TransformSpec},
    engine::{Engine, Outcome, Verdict},
    error::{DropReason, Result},
    logging::{LogConfig, LogFormat, init_logging},
    modifier::LeadingToken,
    monitor::VerdictMonitor,
    packet::Packet,
};

const BATCH_LIMIT: usize = 10000;
const QUEUE_MAX_LEN: u32 = 10000;

#[derive(Parser)]
#[command(name = "nfq_mangle")]
#[command(about = "Rewrite the application data of queued IPv4 TCP/UDP packets")]
struct Cli {
    /// NFQUEUE number to bind (repeatable)
    #[arg(short, long = "queue", default_value = "0")]
    queues: Vec<u16>,

    /// How the transport checksum is restored
    #[arg(long, value_enum, default_value_t = ChecksumMode::Full)]
    checksum: ChecksumMode,

    /// Log level: error, warn, info, debug, trace (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Validate the configuration, print it and exit
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    transform: TransformCmd,
}

#[derive(Subcommand)]
enum TransformCmd {
    /// XOR the application data with a cyclic key
    Xor {
        /// Key as a raw string
        #[arg(long)]
        key: Option<String>,

        /// Key in hex
        #[arg(long)]
        hex_key: Option<String>,
    },
    /// Turn l and r into w
    Uwu {
        /// Treatment of an all-caps first word (heuristic, unverified)
        #[arg(long, value_enum, default_value_t = LeadingToken::Protect)]
        leading_token: LeadingToken,
    },
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        let transform = match &self.transform {
            TransformCmd::Xor { key, hex_key } => TransformSpec::Xor(KeyArgs {
                key: key.clone(),
                hex_key: hex_key.clone(),
            }),
            TransformCmd::Uwu { leading_token } => TransformSpec::Uwu(*leading_token),
        };
        EngineConfig {
            transform,
            checksum: self.checksum,
        }
    }
}

fn make_queue(queue_num: u16) -> std::io::Result<Queue> {
    let mut q = Queue::open()?;
    q.bind(queue_num)?;
    q.set_copy_range(queue_num, 0xFFFF)?;
    q.set_queue_max_len(queue_num, QUEUE_MAX_LEN)?;
    q.set_nonblocking(true);
    Ok(q)
}

type PacketResult = std::result::Result<Outcome, DropReason>;

/// Runs one queued payload through the engine, completing any deferred
/// checksum. The rewritten bytes come back only for a mangled packet.
fn mangle_payload(engine: &Engine, payload: &[u8]) -> (PacketResult, Option<Vec<u8>>) {
    let mut packet = Packet::from_slice(payload);
    let result = engine
        .process(&mut packet, None)
        .and_then(|outcome| packet.finish_checksum().map(|()| outcome));
    let rewritten = matches!(result, Ok(Outcome::Mangled)).then(|| packet.to_vec());
    (result, rewritten)
}

/// Runs one queued packet through the engine and stamps the verdict on it.
fn handle(engine: &Engine, msg: &mut Message) -> (PacketResult, usize) {
    let pkt_len = msg.get_payload().len();
    let (result, rewritten) = mangle_payload(engine, msg.get_payload());

    if let Some(payload) = rewritten {
        msg.set_payload(payload);
    }
    msg.set_verdict(match Verdict::from(&result) {
        Verdict::Continue => NfqVerdict::Accept,
        Verdict::Drop => NfqVerdict::Drop,
    });
    (result, pkt_len)
}

fn run(cli: Cli) -> Result<()> {
    let engine = Engine::configure(cli.engine_config())?;

    if cli.print_config {
        println!(
            "{} --checksum {}",
            engine.transform().save(),
            match engine.checksum_mode() {
                ChecksumMode::Full => "full",
                ChecksumMode::Deferred => "deferred",
            }
        );
        return Ok(());
    }

    let mut queues: Vec<Queue> = cli
        .queues
        .iter()
        .map(|&n| make_queue(n))
        .collect::<std::io::Result<_>>()?;
    info!(
        transform = %engine.transform(),
        checksum = ?engine.checksum_mode(),
        queues = ?cli.queues,
        "engine configured, waiting for packets"
    );

    let mut monitor = VerdictMonitor::new("nfq_mangle");

    loop {
        let mut working = false;

        let mut packet_count = 0;
        loop {
            if packet_count >= BATCH_LIMIT {
                break;
            }
            let mut no_packet = true;
            for (q, &queue_num) in queues.iter_mut().zip(&cli.queues) {
                let mut msg = match q.recv() {
                    Ok(msg) => msg,
                    Err(_) => continue,
                };
                working = true;
                packet_count += 1;
                no_packet = false;

                let (result, pkt_len) = handle(&engine, &mut msg);
                monitor.record(queue_num, &result, pkt_len);
                if let Err(e) = q.verdict(msg) {
                    warn!(queue = queue_num, error = %e, "failed to send verdict");
                }
            }
            if no_packet {
                break;
            }
        }

        monitor.check_and_report();

        if !working {
            std::thread::sleep(Duration::from_micros(100));
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&LogConfig {
        level: cli.log_level.clone(),
        format: cli.log_format,
    });

    if let Err(e) = run(cli) {
        error!(error = %e, "fatal");
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}
