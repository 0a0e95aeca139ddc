//! nedflix-cli - 命令行工具
//!
//! 查看 API 响应文件，或通过播放引擎播放本地 WAV / PCM

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{unbounded, Sender};

use nedflix_audio::{
    Engine, EngineCommand, EngineConfig, EngineError, EngineEvent, PlaybackState, Platform,
};
use nedflix_json::api::{parse_listing, stream_url, ApiError};
use nedflix_json::{get_string, ParseError};

/// 命令行错误
#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] ParseError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Audio unavailable: {0}")]
    Audio(#[source] EngineError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Read {
        path: path.to_owned(),
        source,
    })
}

#[derive(Parser)]
#[command(name = "nedflix-cli", version, about = "Nedflix client tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 解析 API 响应文件并打印摘要
    Inspect {
        file: PathBuf,
        /// 服务器地址，用于打印流地址
        #[arg(long)]
        base_url: Option<String>,
    },
    /// 播放本地 WAV / PCM 文件
    Play {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = PlatformArg::Desktop)]
        platform: PlatformArg,
        /// 缓冲槽大小 (KiB)
        #[arg(long)]
        slot_kb: Option<usize>,
        /// 音量 (0 - 100)
        #[arg(long, default_value_t = 100, allow_negative_numbers = true)]
        volume: i32,
        /// 引擎配置文件 (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    Dreamcast,
    #[value(name = "xbox360")]
    Xbox360,
    Desktop,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Dreamcast => Platform::Dreamcast,
            PlatformArg::Xbox360 => Platform::Xbox360,
            PlatformArg::Desktop => Platform::Desktop,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Inspect { file, base_url } => inspect(&file, base_url.as_deref()),
        Command::Play {
            file,
            platform,
            slot_kb,
            volume,
            config,
        } => load_config(platform, slot_kb, config.as_deref())
            .and_then(|config| play(&file, config, volume)),
    };

    if let Err(msg) = result {
        eprintln!("Error: {}", msg);
        std::process::exit(1);
    }
}

fn inspect(file: &Path, base_url: Option<&str>) -> Result<(), CliError> {
    let body = read_file(file)?;
    let root = nedflix_json::try_parse_slice(&body)?;

    if let Some(token) = get_string(&root, "token") {
        println!("Login response");
        println!("  Token: {}", token);
        return Ok(());
    }

    let entries = match parse_listing(&root) {
        Ok(entries) => entries,
        Err(ApiError::MissingField(_)) => {
            // 未知结构，原样输出
            println!("{}", root);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("Listing: {} entries", entries.len());
    for entry in &entries {
        let kind = if entry.is_directory { "dir " } else { "file" };
        match entry.duration {
            Some(secs) => {
                let duration = Duration::from_secs_f64(secs.min(1e9));
                println!("  [{}] {} ({})", kind, entry.name, format_time(duration));
            }
            None => println!("  [{}] {}", kind, entry.name),
        }
        if let (Some(base), false) = (base_url, entry.is_directory) {
            println!("         {}", stream_url(base, entry)?);
        }
    }
    Ok(())
}

fn load_config(
    platform: PlatformArg,
    slot_kb: Option<usize>,
    path: Option<&Path>,
) -> Result<EngineConfig, CliError> {
    let mut config = match path {
        Some(path) => serde_json::from_slice(&read_file(path)?)?,
        None => EngineConfig::for_platform(platform.into()),
    };
    if let Some(kb) = slot_kb {
        config.slot_size = kb * 1024;
    }
    Ok(config)
}

const COMMAND_HELP: &str =
    "Commands: p = pause, r = resume, s <sec> = seek, v <0-100> = volume, x = stop, q = quit";

fn play(file: &Path, config: EngineConfig, volume: i32) -> Result<(), CliError> {
    let mut engine = Engine::with_default_output(config).map_err(CliError::Audio)?;
    let events = engine.events();

    engine.set_volume(volume);
    engine.play(&file.to_string_lossy())?;

    // 保留一个发送端，stdin 关闭后继续播放
    let (cmd_tx, cmd_rx) = unbounded();
    spawn_stdin_reader(cmd_tx.clone());
    println!("{}", COMMAND_HELP);

    let mut last_report = Instant::now();
    engine.run(&cmd_rx, Duration::from_millis(5), |engine| {
        for event in events.try_iter() {
            if !report_event(event) {
                return false;
            }
        }

        if last_report.elapsed() >= Duration::from_millis(500) {
            print!(
                "\r{} / {}  vol {:>3}  underruns {}   ",
                format_time(engine.position()),
                format_time(engine.duration()),
                engine.volume(),
                engine.stats().underruns
            );
            let _ = std::io::stdout().flush();
            last_report = Instant::now();
        }
        true
    });

    drop(cmd_tx);
    println!();
    Ok(())
}

/// 打印引擎事件；播放结束时返回 `false`
fn report_event(event: EngineEvent) -> bool {
    match event {
        EngineEvent::TrackInfo(info) => {
            println!(
                "Playing {} ({} Hz, {} ch, {} bit, {}{})",
                info.descriptor,
                info.format.sample_rate,
                info.format.channels,
                info.format.bits_per_sample,
                format_time(info.duration),
                if info.duration_estimated { " estimated" } else { "" }
            );
        }
        EngineEvent::TrackEnded => {
            println!("\nFinished");
            return false;
        }
        EngineEvent::StateChanged(PlaybackState::Idle) => {
            println!("\nStopped");
            return false;
        }
        EngineEvent::StateChanged(state) => log::info!("State: {:?}", state),
        EngineEvent::Error(msg) => eprintln!("\nError: {}", msg),
    }
    true
}

fn spawn_stdin_reader(cmd_tx: Sender<EngineCommand>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Some(cmd) => {
                    if cmd_tx.send(cmd).is_err() {
                        break;
                    }
                }
                None => eprintln!("Unknown command: {}", line.trim()),
            }
        }
    });
}

fn parse_command(line: &str) -> Option<EngineCommand> {
    let mut parts = line.split_whitespace();
    let cmd = match (parts.next()?, parts.next()) {
        ("p" | "pause", None) => EngineCommand::Pause,
        ("r" | "resume", None) => EngineCommand::Resume,
        ("x" | "stop", None) => EngineCommand::Stop,
        ("q" | "quit", None) => EngineCommand::Shutdown,
        ("s" | "seek", Some(secs)) => {
            let secs: f64 = secs.parse().ok()?;
            if !(0.0..1e9).contains(&secs) {
                return None;
            }
            EngineCommand::Seek(Duration::from_secs_f64(secs))
        }
        ("v" | "volume", Some(vol)) => EngineCommand::SetVolume(vol.parse().ok()?),
        _ => return None,
    };
    Some(cmd)
}

fn format_time(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("p"), Some(EngineCommand::Pause));
        assert_eq!(parse_command("  resume "), Some(EngineCommand::Resume));
        assert_eq!(
            parse_command("s 12.5"),
            Some(EngineCommand::Seek(Duration::from_millis(12_500)))
        );
        assert_eq!(parse_command("v -3"), Some(EngineCommand::SetVolume(-3)));
        assert_eq!(parse_command("q"), Some(EngineCommand::Shutdown));

        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("s"), None);
        assert_eq!(parse_command("s -1"), None);
        assert_eq!(parse_command("s nan"), None);
        assert_eq!(parse_command("v loud"), None);
        assert_eq!(parse_command("p now"), None);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Duration::ZERO), "00:00");
        assert_eq!(format_time(Duration::from_secs(185)), "03:05");
    }

    #[test]
    fn test_load_config() {
        let config = load_config(PlatformArg::Dreamcast, None, None).unwrap();
        assert_eq!(config.slot_size, 16 * 1024);

        let config = load_config(PlatformArg::Desktop, Some(8), None).unwrap();
        assert_eq!(config.slot_size, 8 * 1024);

        let missing = Path::new("/nonexistent/x.json");
        let err = load_config(PlatformArg::Desktop, None, Some(missing)).unwrap_err();
        assert!(matches!(err, CliError::Read { .. }));
        assert!(err.to_string().starts_with("Failed to read /nonexistent/x.json"));
    }

    #[test]
    fn test_load_config_file() {
        let dir = std::env::temp_dir().join(format!("nedflix-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("engine.json");
        std::fs::write(&path, br#"{"slot_count":3,"slot_size":4096}"#).unwrap();
        let config = load_config(PlatformArg::Dreamcast, Some(2), Some(&path)).unwrap();
        assert_eq!(config.slot_count, 3);
        assert_eq!(config.slot_size, 2 * 1024);

        let path = dir.join("broken.json");
        std::fs::write(&path, b"{\"slot_count\":").unwrap();
        let err = load_config(PlatformArg::Desktop, None, Some(&path)).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_report_event_stops_on_end() {
        assert!(!report_event(EngineEvent::TrackEnded));
        assert!(!report_event(EngineEvent::StateChanged(PlaybackState::Idle)));
        assert!(report_event(EngineEvent::StateChanged(PlaybackState::Paused)));
        assert!(report_event(EngineEvent::Error("underrun".into())));
    }

    #[test]
    fn test_inspect_errors() {
        let err = inspect(Path::new("/nonexistent/listing.json"), None).unwrap_err();
        assert!(matches!(err, CliError::Read { .. }));

        let name = format!("nedflix-inspect-{}.json", std::process::id());
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, br#"{"files":[{"name":"a.wav","path":"/a.wav"}]}"#).unwrap();
        assert!(inspect(&path, Some("http://nas:3000")).is_ok());
        let err = inspect(&path, Some("not a url")).unwrap_err();
        assert!(matches!(err, CliError::Api(ApiError::InvalidUrl(_))));

        std::fs::write(&path, b"[1,").unwrap();
        let err = inspect(&path, None).unwrap_err();
        assert!(matches!(err, CliError::Json(ParseError::UnexpectedEnd)));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_cli_parses() {
        let args = ["nedflix-cli", "play", "a.wav", "--platform", "xbox360", "--volume", "40"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Play { file, platform, volume, .. } => {
                assert_eq!(file, PathBuf::from("a.wav"));
                assert!(matches!(platform, PlatformArg::Xbox360));
                assert_eq!(volume, 40);
            }
            Command::Inspect { .. } => panic!("expected play"),
        }
    }
}
