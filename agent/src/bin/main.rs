//! CLI entry point (spec §6): pick a transport and a middleware binding,
//! then hand both to [`agent::server::Server`] until Ctrl+C or SIGTERM.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use agent::middleware::{Middleware, NullMiddleware};
use agent::server::{Server, ServerConfig};
use agent::transports::{SerialTransport, TcpTransport, Transport, UdpTransport};
#[cfg(target_os = "linux")]
use agent::transports::CanTransport;
use clap::{Parser, Subcommand, ValueEnum};
use runtime::Shutdown;

/// Framing buffer size for the byte-stream transports (serial, CAN); the
/// wire MTU negotiated per-session by CREATE_CLIENT is unrelated.
const FRAMING_MTU: usize = 512;
const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_CAN_RESPONSE_ID: u32 = 0x01;

#[derive(Parser)]
#[command(name = "xrce-agent", about = "XRCE-DDS Agent core")]
struct Cli {
	#[command(subcommand)]
	transport: TransportArgs,

	/// Pub/sub binding new objects are realized against.
	#[arg(long, value_enum, default_value_t = MiddlewareArg::None)]
	middleware: MiddlewareArg,

	/// Port a future P2P discovery announcer would listen on (spec §9's
	/// open question; parsed for surface parity, unused while the `p2p`
	/// feature is off).
	#[arg(long)]
	discovery_port: Option<u16>,

	#[arg(long, short)]
	verbose: bool,
}

#[derive(Subcommand)]
enum TransportArgs {
	Udp4 {
		#[arg(long, default_value_t = 8888)]
		port: u16,
	},
	Udp6 {
		#[arg(long, default_value_t = 8888)]
		port: u16,
	},
	Tcp4 {
		#[arg(long, default_value_t = 8888)]
		port: u16,
	},
	Tcp6 {
		#[arg(long, default_value_t = 8888)]
		port: u16,
	},
	Serial {
		#[arg(long)]
		device: String,
		#[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
		baud: u32,
	},
	Pseudoterminal {
		#[arg(long)]
		device: String,
	},
	Can {
		#[arg(long)]
		interface: String,
		#[arg(long, default_value_t = DEFAULT_CAN_RESPONSE_ID)]
		response_id: u32,
	},
}

#[derive(Clone, Copy, ValueEnum)]
enum MiddlewareArg {
	Dds,
	None,
}

fn open_transport(args: &TransportArgs) -> io::Result<Arc<dyn Transport>> {
	match args {
		TransportArgs::Udp4 { port } => UdpTransport::bind(&format!("0.0.0.0:{port}")),
		TransportArgs::Udp6 { port } => UdpTransport::bind(&format!("[::]:{port}")),
		TransportArgs::Tcp4 { port } => TcpTransport::bind(&format!("0.0.0.0:{port}")),
		TransportArgs::Tcp6 { port } => TcpTransport::bind(&format!("[::]:{port}")),
		TransportArgs::Serial { device, baud } => SerialTransport::open(device, *baud, FRAMING_MTU),
		TransportArgs::Pseudoterminal { device } => SerialTransport::open(device, DEFAULT_BAUD_RATE, FRAMING_MTU),
		#[cfg(target_os = "linux")]
		TransportArgs::Can { interface, response_id } => CanTransport::open(interface, *response_id, FRAMING_MTU),
		#[cfg(not(target_os = "linux"))]
		TransportArgs::Can { .. } => Err(io::Error::new(io::ErrorKind::Unsupported, "CAN transport is only available on Linux")),
	}
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	runtime::logger::init(cli.verbose);

	let middleware: Arc<dyn Middleware> = match cli.middleware {
		MiddlewareArg::None => Arc::new(NullMiddleware),
		MiddlewareArg::Dds => {
			log::error!("--middleware dds is unimplemented; no DDS binding is linked into this build");
			return ExitCode::FAILURE;
		}
	};

	if let Some(port) = cli.discovery_port {
		log::debug!("discovery port {port} noted; P2P discovery is compiled out of this build");
	}

	let transport = match open_transport(&cli.transport) {
		Ok(transport) => transport,
		Err(e) => {
			log::error!("failed to open transport: {e}");
			return ExitCode::FAILURE;
		}
	};

	let shutdown = Shutdown::new();
	if let Err(e) = shutdown.install_ctrlc() {
		log::warn!("failed to install ctrl-c handler: {e}");
	}

	log::info!("xrce-agent running");
	Server::new().run(transport, middleware, ServerConfig::default(), shutdown);
	log::info!("xrce-agent stopped");

	ExitCode::SUCCESS
}
