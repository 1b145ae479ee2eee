// Runs on the Zynq board: brings the AD9695 JESD204 link up, then serves the
// operator console on stdin and the clock delay control port over UDP.
use ad9695::bringup::{Bases, Frontend};
use ad9695::bus::{DevMem, GpioPin, Mmio, Spi, StdDelay};
use ad9695::config::{Config, Window};
use ad9695::console::{Command, LineBuffer, Reply};
use ad9695::dma::CaptureBuffer;
use ad9695::stream::{DelayControl, Streamer};
use ad9695::{Error, LinkStatus};
use anyhow::{Context, Result};
use clap::Parser;
use mio::net::UdpSocket;
use mio::{unix::SourceFd, Events, Interest, Poll, Token};
use mio_signals::{Signal, Signals};
use std::{
    io::{ErrorKind, Stdin, Write},
    os::fd::AsRawFd,
    path::PathBuf,
};
use timerfd::{SetTimeFlags, TimerFd, TimerState};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type Board = Frontend<Spi, GpioPin, Mmio, DevMem, StdDelay>;

const PROMPT: &str = "daq$ ";

#[derive(Parser, Debug)]
/// Try it out: `spi -r 0x4` on stdin, or for the delay port
///             `printf '\x06\x10\x20\x03' | socat - UDP:<board>:5002`
struct Args {
    /// TOML board configuration, reference defaults when absent
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// tracing filter, overrides RUST_LOG
    #[arg(short, long)]
    log: Option<String>,
    /// skip link bring-up and go straight to the console
    #[arg(long)]
    skip_bringup: bool,
}

fn map(config: &Config, window: Window, name: &str) -> Result<Mmio> {
    Mmio::map(&config.devmem, window.base, window.size)
        .with_context(|| format!("mapping {} window at {:#x}", name, window.base))
}

fn open_board(config: &Config) -> Result<Board> {
    let spi = Spi::open(&config.adc.spi, config.adc.spi_speed_hz)
        .with_context(|| format!("opening {}", config.adc.spi.display()))?;
    let pin = GpioPin::request(&config.adc.gpio_chip, config.adc.powerdown_line)
        .context("requesting the ADC power-down line")?;
    let capture = Window {
        base: config.capture.base,
        size: config.capture.len,
    };
    let buffer = CaptureBuffer::new(
        map(config, capture, "capture")?,
        config.capture.base,
        config.capture.len,
    );
    Ok(Frontend::new(
        spi,
        pin,
        map(config, config.phy, "phy")?,
        map(config, config.link, "link")?,
        map(config, config.dma, "dma")?,
        buffer,
        DevMem::new(&config.devmem),
        Bases {
            phy: config.phy.base,
            link: config.link.base,
        },
        StdDelay,
    ))
}

fn stream(board: &mut Board, streamer: &mut Streamer, socket: &mut UdpSocket) {
    if !streamer.armed() {
        return;
    }
    let sent = board
        .buffer
        .bytes()
        .and_then(|payload| streamer.send(socket, &payload));
    if let Err(e) = sent {
        error!("streaming failed: {}", e);
    }
}

fn console_line(board: &mut Board, streamer: &mut Streamer, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match line.parse::<Command>().and_then(|cmd| board.execute(cmd)) {
        Ok(reply) => {
            if reply == Reply::StreamArmed {
                streamer.arm();
            }
            println!("{}", reply);
        }
        Err(e @ Error::Command(_)) => println!("{}", e),
        Err(e) => {
            if e.is_transport() {
                error!("{}", e);
            }
            println!("Command Error: {}", e);
        }
    }
}

/// Drain stdin into `pending`. The fd is edge triggered, so keep reading
/// until nothing is left. Returns the completed lines and whether stdin
/// has closed.
fn read_console(
    stdin: &Stdin,
    pending: &mut LineBuffer,
    hung_up: bool,
) -> Result<(Vec<String>, bool)> {
    let mut buf = [0; 4096];
    let mut lines = Vec::new();
    loop {
        let n = rustix::io::read(stdin, &mut buf).context("console read failed")?;
        if n == 0 {
            lines.extend(pending.finish());
            return Ok((lines, true));
        }
        lines.extend(pending.push(&buf[..n]));
        if !hung_up && rustix::io::ioctl_fionread(stdin)? == 0 {
            return Ok((lines, false));
        }
    }
}

fn delay_datagrams(board: &mut Board, socket: &mut UdpSocket) -> Result<()> {
    let mut buf = [0; 64];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((amt, src)) => {
                info!("delay control from {}", src);
                match DelayControl::parse(&buf[..amt]) {
                    Ok(ctl) => {
                        if let Err(e) = board.apply_delay_control(ctl) {
                            error!("applying delay control: {}", e);
                        }
                    }
                    Err(e) => warn!("{}", e),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e).context("control socket read failed"),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match &args.log {
        Some(f) => EnvFilter::try_new(f)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    let mut board = open_board(&config)?;
    if args.skip_bringup {
        warn!("bring-up skipped");
    } else {
        let report = board
            .bring_up(config.adc.state, &config.jesd)
            .context("link bring-up")?;
        if let Err(e) = &report.adc.jesd {
            error!("JESD configuration not applied: {}", e);
        }
        info!(
            "bring-up done: scratchpad {:?}, reset {:?}, adc {:?}, phy {:?}",
            report.adc.scratchpad, report.adc.soft_reset, report.adc.lock, report.phy
        );
    }

    let mut poll = Poll::new()?;
    let registry = poll.registry();
    let mut events = Events::with_capacity(128);

    let stdin = std::io::stdin();
    let stdin_fd = stdin.as_raw_fd();
    const CONSOLE: Token = Token(0);
    // stdin is /dev/null under systemd, which epoll refuses
    let mut console = registry
        .register(&mut SourceFd(&stdin_fd), CONSOLE, Interest::READABLE)
        .map_err(|e| warn!("console disabled: {}", e))
        .is_ok();

    let mut control = UdpSocket::bind(config.net.bind)
        .with_context(|| format!("binding {}", config.net.bind))?;
    const CONTROL: Token = Token(1);
    registry.register(&mut control, CONTROL, Interest::READABLE)?;

    let mut tfd = TimerFd::new()?;
    tfd.set_state(
        TimerState::Periodic {
            current: config.monitor.interval(),
            interval: config.monitor.interval(),
        },
        SetTimeFlags::Default,
    );
    const MONITOR: Token = Token(2);
    registry.register(&mut SourceFd(&tfd.as_raw_fd()), MONITOR, Interest::READABLE)?;

    const CTRLC: Token = Token(3);
    let mut signals = Signals::new(Signal::Interrupt.into())?;
    registry.register(&mut signals, CTRLC, Interest::READABLE)?;

    let mut streamer = Streamer::new(config.net.host, config.net.packets);
    let mut pending = LineBuffer::default();
    let mut last_status: Option<LinkStatus> = None;

    if console {
        print!("{}", PROMPT);
        _ = std::io::stdout().flush();
    }

    'outer: loop {
        poll.poll(&mut events, None)?;
        for event in events.iter() {
            match event.token() {
                CONSOLE => {
                    let (lines, closed) =
                        read_console(&stdin, &mut pending, event.is_read_closed())?;
                    for line in lines {
                        console_line(&mut board, &mut streamer, &line);
                        stream(&mut board, &mut streamer, &mut control);
                    }
                    if closed {
                        info!("console closed");
                        poll.registry().deregister(&mut SourceFd(&stdin_fd))?;
                        console = false;
                        continue;
                    }
                    print!("{}", PROMPT);
                    _ = std::io::stdout().flush();
                }
                CONTROL => delay_datagrams(&mut board, &mut control)?,
                MONITOR => {
                    tfd.read();
                    match board.link_status() {
                        Ok(status) if last_status != Some(status) => {
                            if status.is_up() {
                                info!("link up: {:?}", status);
                            } else {
                                warn!("link down: {:?}", status);
                            }
                            last_status = Some(status);
                        }
                        Ok(_) => (),
                        Err(e) => error!("link monitor: {}", e),
                    }
                }
                CTRLC => break 'outer,
                _ => unreachable!(),
            }
        }
    }

    if console {
        println!();
    }
    if let Err(e) = board.dma.reset() {
        error!("DMA reset on exit: {}", e);
    }
    info!("exiting");
    Ok(())
}
