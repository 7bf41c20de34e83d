use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{self, Context};
use crossbeam_channel::Receiver;
use sockline::io::UnixAdapter;
use sockline::plugins::TracingPlugin;
use sockline::{Client, ClientBuilder, ClientConfig, Timeout};
use tracing_subscriber::filter::EnvFilter;

/// How long to wait for keyboard input before checking the socket again
const INPUT_POLL: Duration = Duration::from_millis(50);

struct App {
    client: Client<UnixAdapter>,
    read_timeout: Option<Timeout>,
    max_line_length: Option<usize>,
    input_rx: Receiver<String>,

    #[allow(dead_code)]
    input_thread: JoinHandle<()>,
}

impl App {
    fn new(client: Client<UnixAdapter>, config: &ClientConfig) -> Self {
        let (input_tx, input_rx) = crossbeam_channel::unbounded();
        let input_thread = std::thread::spawn(move || {
            let mut buffer = String::new();
            loop {
                match std::io::stdin().read_line(&mut buffer) {
                    Ok(0) => break,
                    Ok(_) => {
                        let input = buffer.trim_end_matches(['\r', '\n']).to_owned();
                        if input_tx.send(input).is_err() {
                            break;
                        }
                        buffer.clear();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reading from stdin");
                        break;
                    }
                }
            }
        });

        Self {
            client,
            read_timeout: config.read_timeout(),
            max_line_length: config.max_line_length,
            input_rx,
            input_thread,
        }
    }

    fn loop_step(&mut self) -> eyre::Result<ShouldQuit> {
        crossbeam_channel::select! {
            recv(self.input_rx) -> input => match input {
                Ok(input) => self.handle_input(&input).context("sending input")?,
                Err(_) => {
                    tracing::debug!("stdin closed");
                    return Ok(ShouldQuit::True);
                }
            },
            default(INPUT_POLL) => {}
        }

        if self.client.is_closed() {
            println!("connection closed");
            return Ok(ShouldQuit::True);
        }
        self.print_available().context("reading from socket")
    }

    #[tracing::instrument(skip(self))]
    fn handle_input(&mut self, input: &str) -> eyre::Result<()> {
        self.client.write_line(input)?;
        if let Some(timeout) = self.read_timeout {
            if let Some(line) = self.client.read_line(timeout, self.max_line_length)? {
                print_line(&line)?;
            }
        }
        Ok(())
    }

    /// Print every complete line that has already arrived
    fn print_available(&mut self) -> eyre::Result<ShouldQuit> {
        loop {
            match self.client.read_line(Duration::ZERO, self.max_line_length) {
                Ok(Some(line)) => print_line(&line)?,
                Ok(None) => return Ok(ShouldQuit::False),
                Err(sockline::Error::ConnectionLost(e)) => {
                    tracing::debug!(error = %e, "peer went away");
                    println!("connection closed");
                    return Ok(ShouldQuit::True);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn print_line(line: &[u8]) -> eyre::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(line)?;
    if !line.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Connect to a listening socket
    Connect,
    /// Listen on the socket path and wait for a single peer
    Accept {
        /// Give up after this many milliseconds; waits forever when omitted
        #[clap(short, long, allow_negative_numbers = true)]
        timeout_ms: Option<i64>,
    },
}

#[derive(Debug, Parser)]
struct Args {
    #[clap(subcommand)]
    mode: Mode,

    /// Socket path, overrides the value from the config file
    #[clap(short, long)]
    path: Option<PathBuf>,

    /// JSON client configuration
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Wait this long for a reply after each line sent
    #[clap(short, long)]
    read_timeout_ms: Option<u64>,

    /// Write logs here instead of stderr
    #[clap(long)]
    log_file: Option<PathBuf>,
}

fn load_config(path: &Path) -> eyre::Result<ClientConfig> {
    let contents = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading config file {}", path.display()))?;
    let config = serde_json::from_str(&contents).wrap_err("parsing config file")?;
    Ok(config)
}

fn resolve_config(args: &Args) -> eyre::Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    if let Some(path) = &args.path {
        config.path = Some(path.clone());
    }
    if let Some(ms) = args.read_timeout_ms {
        config.read_timeout_ms = Some(ms);
    }
    if config.path.is_none() {
        eyre::bail!("no socket path given, pass --path or set it in the config file");
    }
    Ok(config)
}

fn main() -> eyre::Result<()> {
    color_eyre::install().context("installing color_eyre")?;
    let args = Args::parse();

    match &args.log_file {
        Some(path) => {
            let log_file = std::fs::File::create(path).context("creating log file")?;
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_writer(Mutex::new(log_file))
                .init();
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init(),
    }

    let config = resolve_config(&args)?;
    tracing::debug!(?config, "resolved configuration");
    let mut client = ClientBuilder::from_config(&config)
        .plugin(TracingPlugin)
        .build(UnixAdapter);

    match args.mode {
        Mode::Connect => client.connect().context("connecting to socket")?,
        Mode::Accept { timeout_ms } => {
            let timeout = match timeout_ms {
                Some(ms) => Timeout::try_from(ms)?,
                None => Timeout::Unbounded,
            };
            client.accept(timeout).context("waiting for peer")?;
            if client.is_closed() {
                eyre::bail!("no peer connected before the timeout");
            }
        }
    }

    let mut app = App::new(client, &config);
    loop {
        match app.loop_step() {
            Ok(ShouldQuit::True) => break,
            Ok(ShouldQuit::False) => {}
            Err(e) => eyre::bail!("Error running repl: {e:?}"),
        }
    }

    Ok(())
}

enum ShouldQuit {
    True,
    False,
}
