use anyhow::bail;
use cast_session::{
    payload::{media, receiver::VolumeRequest},
    AppKind, Config, Platform, PlatformEvent, Result,
};
use clap::Parser;
use futures::StreamExt;
use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

#[derive(clap::Parser, Clone, Debug)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[clap(flatten)]
    target: TargetArgs,

    /// Log JSON (bunyan format) to stdout instead of pretty logs to stderr.
    #[arg(long, default_value_t = false)]
    log_json: bool,

    /// Caller-level deadline for each request, in seconds.
    #[arg(long, value_name = "SECONDS")]
    request_timeout: Option<f64>,
}

#[derive(clap::Args, Clone, Debug)]
#[group(id = "target_args", multiple = false, required = true)]
struct TargetArgs {
    /// Receiver IP address (IPv4 or IPv6). Uses TCP port 8009.
    #[arg(long, value_name = "TARGET_IP")]
    ip: Option<IpAddr>,

    /// Receiver IP address and TCP port.
    #[arg(long, value_name = "TARGET_IP:PORT")]
    addr: Option<SocketAddr>,
}

#[derive(clap::Subcommand, Clone, Debug)]
enum Command {
    /// Print receiver status and follow device events until Ctrl-C.
    Events,
    Load(LoadArgs),
    SetVolume(SetVolumeArgs),
    Status,

    /// Stop every running application.
    Stop,
}

#[derive(clap::Args, Clone, Debug)]
struct LoadArgs {
    #[arg(long)]
    url: String,

    #[arg(long)]
    content_type: Option<String>,

    /// Follow player status until Ctrl-C, then stop the app.
    #[arg(long, default_value_t = false)]
    follow: bool,
}

#[derive(clap::Args, Clone, Debug)]
#[group(required = true, multiple = false)]
struct SetVolumeArgs {
    #[arg(long)]
    level: Option<f32>,

    #[arg(long)]
    mute: bool,

    #[arg(long)]
    unmute: bool,
}

impl TargetArgs {
    fn socket_addr(&self) -> Result<SocketAddr> {
        if let Some(addr) = self.addr {
            Ok(addr)
        } else if let Some(ip) = self.ip {
            Ok(Config::from_ip(ip).addr)
        } else {
            bail!("TargetArgs::socket_addr: no target specified\n\
                   self = {self:#?}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.log_json)?;

    tracing::debug!(?args, "args");

    let mut config = Config::new(args.target.socket_addr()?);
    if let Some(secs) = args.request_timeout {
        config = config.with_request_timeout(Duration::from_secs_f64(secs));
    }

    let platform = Platform::connect(config).await?;

    let res = match args.command {
        Command::Events => events_main(&platform).await,
        Command::Load(sub_args) => load_main(&platform, sub_args).await,
        Command::SetVolume(sub_args) => set_volume_main(&platform, sub_args).await,
        Command::Status => status_main(&platform).await,
        Command::Stop => {
            platform.stop(None).await;
            Ok(())
        },
    };

    platform.close().await?;

    res
}

async fn status_main(platform: &Platform) -> Result<()> {
    let status = platform.status().await?;
    println!("{status:#?}");
    Ok(())
}

async fn set_volume_main(platform: &Platform, sub_args: SetVolumeArgs) -> Result<()> {
    let req = match sub_args {
        SetVolumeArgs { level: Some(level), .. } => VolumeRequest::Level(level),
        SetVolumeArgs { mute: true, .. } => VolumeRequest::Muted(true),
        SetVolumeArgs { unmute: true, .. } => VolumeRequest::Muted(false),
        _ => bail!("set_volume_main: no volume change given"),
    };

    let volume = platform.set_volume(req).await?;
    println!("{volume:#?}");
    Ok(())
}

async fn load_main(platform: &Platform, sub_args: LoadArgs) -> Result<()> {
    let app = platform.get_or_launch(AppKind::DefaultMediaReceiver).await?;

    let mut media = media::Media::from_content_id(sub_args.url);
    media.content_type = sub_args.content_type;

    let status = app.load(media, media::LoadOptions::autoplay()).await?;
    println!("{status:#?}");

    if !sub_args.follow {
        return Ok(());
    }

    let mut events = app.status_events();
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => println!("{event:#?}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                platform.stop(Some(app.as_ref())).await;
                break;
            },
        }
    }

    Ok(())
}

async fn events_main(platform: &Platform) -> Result<()> {
    status_main(platform).await?;

    let mut events = Box::pin(platform.events());
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(PlatformEvent::Closed) | None => break,
                Some(event) => println!("{event:#?}"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

#[derive(Eq, PartialEq)]
enum LogMode {
    PrettyAnsi,
    Pretty,
    Json,
}

fn init_logging(log_json: bool) -> Result<()> {
    use std::io::IsTerminal;
    use tracing_bunyan_formatter::{
        BunyanFormattingLayer,
        JsonStorageLayer,
    };
    use tracing_subscriber::{
        EnvFilter,
        filter::LevelFilter,
        fmt,
        prelude::*,
    };

    let log_mode =
        if log_json {
            LogMode::Json
        } else if std::io::stderr().is_terminal() {
            LogMode::PrettyAnsi
        } else {
            LogMode::Pretty
        };

    tracing_subscriber::Registry::default()
        .with(match log_mode {
                  LogMode::PrettyAnsi | LogMode::Pretty => {
                      Some(fmt::Layer::new()
                               .event_format(fmt::format()
                                                 .pretty()
                                                 .with_ansi(log_mode == LogMode::PrettyAnsi)
                                                 .with_timer(fmt::time::UtcTime::<_>::
                                                                 rfc_3339())
                                                 .with_target(true)
                                                 .with_source_location(true)
                                                 .with_thread_ids(true))
                               .with_ansi(log_mode == LogMode::PrettyAnsi)
                               .with_writer(std::io::stderr))
                  },
                  LogMode::Json => None,
             })
        .with(if log_mode == LogMode::Json {
                  Some(JsonStorageLayer
                           .and_then(BunyanFormattingLayer::new(
                               env!("CARGO_CRATE_NAME").to_string(),
                               std::io::stdout)))
              } else {
                  None
              })
        .with(EnvFilter::builder()
                  .with_default_directive(LevelFilter::INFO.into())
                  .parse(std::env::var("RUST_LOG")
                             .unwrap_or(format!("warn,{lib}=info",
                                                lib = "cast_session")))?)
        .try_init()?;

    Ok(())
}
