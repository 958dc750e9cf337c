use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use atelier_contracts::credentials::{CredentialChain, CredentialKind, CredentialStore, OverrideSource};
use atelier_contracts::media::{ImagePayload, ImageRef};
use atelier_contracts::outfit::GarmentSlot;
use atelier_contracts::wardrobe::{label_from_file_name, Wardrobe};
use atelier_contracts::TryOnError;
use atelier_engine::providers::VeoProvider;
use atelier_engine::{
    CancelToken, Compositor, DryrunVideoProvider, EngineConfig, Ingestor, PollPolicy, Schedule,
    Session, VideoOrchestrator, VideoProvider, VideoSource, VideoState,
};
use clap::{Parser, Subcommand};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "atelier", version, about = "Virtual try-on lookbooks from the command line")]
struct Cli {
    /// State directory (credentials, wardrobe, runs). Defaults to ATELIER_HOME or ~/.atelier.
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Keys(KeysCommand),
    #[command(subcommand)]
    Wardrobe(WardrobeCommand),
    TryOn(TryOnArgs),
    Compose(ComposeArgs),
    Video(VideoArgs),
}

#[derive(Debug, Subcommand)]
enum KeysCommand {
    /// Show which keys resolve and from where.
    Status,
    Set { provider: String, key: String },
    Clear { provider: String },
}

#[derive(Debug, Subcommand)]
enum WardrobeCommand {
    List {
        #[arg(long)]
        kind: Option<String>,
    },
    Add {
        #[arg(long)]
        kind: String,
        #[arg(long)]
        image: String,
        #[arg(long)]
        label: Option<String>,
    },
    Delete { id: u64 },
    Restore,
}

#[derive(Debug, Default, Parser)]
struct KeyArgs {
    #[arg(long)]
    gemini_key: Option<String>,
    #[arg(long)]
    wavespeed_key: Option<String>,
}

#[derive(Debug, Parser)]
struct TryOnArgs {
    #[arg(long)]
    person: String,
    /// Path, URL, data URL, or wardrobe item id.
    #[arg(long)]
    top: Option<String>,
    #[arg(long)]
    bottom: Option<String>,
    #[arg(long)]
    shoes: Option<String>,
    #[arg(long, default_value = "gemini")]
    provider: String,
    /// Issue the four pose calls concurrently.
    #[arg(long)]
    parallel: bool,
    #[arg(long)]
    out: Option<PathBuf>,
    /// Base directory for relative wardrobe references.
    #[arg(long, default_value = ".")]
    catalog_dir: PathBuf,
    /// Animate the lookbook after it is composed.
    #[arg(long)]
    video: bool,
    /// `composite` or a 1-based pose number.
    #[arg(long, default_value = "composite")]
    video_source: String,
    #[arg(long, default_value = "veo")]
    video_provider: String,
    #[command(flatten)]
    poll: PollArgs,
    #[command(flatten)]
    keys: KeyArgs,
}

#[derive(Debug, Parser)]
struct ComposeArgs {
    /// Exactly four pose images, in pose order.
    #[arg(num_args = 4, required = true)]
    images: Vec<String>,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct VideoArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "veo")]
    provider: String,
    #[command(flatten)]
    poll: PollArgs,
    #[command(flatten)]
    keys: KeyArgs,
}

#[derive(Debug, Clone, Parser)]
struct PollArgs {
    /// Seconds between status polls.
    #[arg(long, default_value_t = 5.0)]
    interval: f64,
    /// Give up after this many seconds.
    #[arg(long)]
    max_wait: Option<f64>,
    #[arg(long)]
    max_attempts: Option<u32>,
}

impl PollArgs {
    fn policy(&self) -> Result<PollPolicy> {
        let interval = seconds(self.interval, "--interval")?;
        if interval.is_zero() {
            bail!("--interval must be greater than zero");
        }
        let mut policy = PollPolicy::every(interval);
        if let Some(max_wait) = self.max_wait {
            policy = policy.with_max_duration(seconds(max_wait, "--max-wait")?);
        }
        if let Some(attempts) = self.max_attempts {
            policy = policy.with_max_attempts(attempts);
        }
        Ok(policy)
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            if let Some(kind) = TryOnError::missing_credential(&err) {
                eprintln!(
                    "atelier: set a key with `atelier keys set {} <key>` or export {}",
                    kind.as_str(),
                    kind.env_keys().join(" / ")
                );
            }
            eprintln!("atelier error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut config = EngineConfig::from_env();
    if let Some(home) = cli.home.clone() {
        config = config.with_state_dir(home);
    }
    match cli.command {
        Command::Keys(command) => run_keys(&config, command),
        Command::Wardrobe(command) => run_wardrobe(&config, command),
        Command::TryOn(args) => run_try_on(&config, args),
        Command::Compose(args) => run_compose(args),
        Command::Video(args) => run_video(&config, args),
    }
}

fn run_keys(config: &EngineConfig, command: KeysCommand) -> Result<i32> {
    let store = CredentialStore::new(config.credentials_path());
    match command {
        KeysCommand::Status => {
            let chain = credential_chain(config, &KeyArgs::default());
            for kind in CredentialKind::ALL {
                match chain.resolve_with_source(kind) {
                    Some((_, source)) => println!("{:<10} set ({source})", kind.as_str()),
                    None => println!("{:<10} missing", kind.as_str()),
                }
            }
        }
        KeysCommand::Set { provider, key } => {
            let kind = parse_credential(&provider)?;
            store.set(kind, &key)?;
            println!("Saved {} key to {}", kind.display_name(), store.path().display());
        }
        KeysCommand::Clear { provider } => {
            let kind = parse_credential(&provider)?;
            store.clear(kind)?;
            println!("Cleared {} key", kind.display_name());
        }
    }
    Ok(0)
}

fn run_wardrobe(config: &EngineConfig, command: WardrobeCommand) -> Result<i32> {
    let mut wardrobe = Wardrobe::load(config.wardrobe_path())?;
    match command {
        WardrobeCommand::List { kind } => {
            let kind = kind.as_deref().map(parse_slot).transpose()?;
            for item in wardrobe.filter(kind) {
                println!(
                    "{:>14}  {:<6}  {:<20}  {}",
                    item.id,
                    item.kind.as_str(),
                    item.label,
                    item.reference
                );
            }
        }
        WardrobeCommand::Add { kind, image, label } => {
            let kind = parse_slot(&kind)?;
            let label = label.unwrap_or_else(|| {
                let name = Path::new(&image)
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| image.clone());
                label_from_file_name(&name)
            });
            let item = wardrobe.add_custom(kind, image, &label)?;
            println!("Added {} ({})", item.label, item.id);
        }
        WardrobeCommand::Delete { id } => match wardrobe.delete(id)? {
            Some(item) => println!("Removed {} ({})", item.label, item.id),
            None => {
                eprintln!("No wardrobe item with id {id}");
                return Ok(1);
            }
        },
        WardrobeCommand::Restore => {
            wardrobe.restore_samples()?;
            println!("Sample garments restored");
        }
    }
    Ok(0)
}

fn run_try_on(config: &EngineConfig, args: TryOnArgs) -> Result<i32> {
    let chain = credential_chain(config, &args.keys);
    let out = match args.out.clone() {
        Some(out) => out,
        None => config.new_run_dir(),
    };
    let schedule = if args.parallel {
        Schedule::Parallel
    } else {
        Schedule::Sequential
    };
    let video_source = parse_video_source(&args.video_source)?;
    let video_provider = if args.video {
        Some(video_provider(config, &chain, &args.video_provider)?)
    } else {
        None
    };

    let ingestor = Ingestor::new();
    let wardrobe = Wardrobe::load(config.wardrobe_path())?;
    let mut session = Session::new(config, chain, &out)?.with_schedule(schedule);
    session.set_person(Some(
        ingestor
            .load(&args.person)
            .with_context(|| format!("failed to load person photo {}", args.person))?,
    ));
    for (slot, reference) in [
        (GarmentSlot::Top, &args.top),
        (GarmentSlot::Bottom, &args.bottom),
        (GarmentSlot::Shoes, &args.shoes),
    ] {
        if let Some(reference) = reference {
            let payload = load_garment(&ingestor, &wardrobe, &args.catalog_dir, slot, reference)?;
            session.set_garment(slot, Some(payload));
        }
    }

    let result = session.generate(&args.provider)?;
    for path in &result.pose_paths {
        println!("pose: {}", path.display());
    }
    if let Some(composite) = &result.composite {
        println!(
            "lookbook: {} ({}x{})",
            composite.path.display(),
            composite.width,
            composite.height
        );
    }
    for warning in session.warnings() {
        eprintln!("warning: {warning}");
    }

    if let Some(provider) = video_provider {
        let video = session.generate_video(
            provider.as_ref(),
            video_source,
            args.poll.policy()?,
            CancelToken::new(),
        )?;
        println!("video: {} ({} bytes)", video.path.display(), video.bytes);
    }
    Ok(0)
}

fn run_compose(args: ComposeArgs) -> Result<i32> {
    let images: Vec<ImageRef> = args.images.iter().map(ImageRef::new).collect();
    let composite = Compositor::new().compose_lookbook(&images)?;
    let artifact = composite.write_to(&args.out)?;
    for warning in &composite.warnings {
        eprintln!("warning: {warning}");
    }
    println!(
        "{}",
        json!({
            "path": artifact.path.to_string_lossy(),
            "width": artifact.width,
            "height": artifact.height,
        })
    );
    Ok(0)
}

fn run_video(config: &EngineConfig, args: VideoArgs) -> Result<i32> {
    let chain = credential_chain(config, &args.keys);
    let provider = video_provider(config, &chain, &args.provider)?;
    if let Some(kind) = provider.credential() {
        chain.require(kind)?;
    }
    let image = atelier_engine::ingest::from_path(&args.image)?;
    let orchestrator = VideoOrchestrator::new(args.poll.policy()?, CancelToken::new());
    let outcome = orchestrator.run_with_observer(
        provider.as_ref(),
        &image,
        &mut |state: VideoState, polls: u32| eprintln!("video: {} (polls: {polls})", state.as_str()),
    )?;
    let artifact = outcome.write_to(&args.out)?;
    println!("video: {} ({} bytes)", artifact.path.display(), artifact.bytes);
    Ok(0)
}

fn credential_chain(config: &EngineConfig, keys: &KeyArgs) -> CredentialChain {
    let overrides = OverrideSource::new()
        .with(CredentialKind::Gemini, keys.gemini_key.clone())
        .with(CredentialKind::Wavespeed, keys.wavespeed_key.clone());
    CredentialChain::standard(
        overrides,
        CredentialStore::new(config.credentials_path()),
        config.config_path(),
    )
}

fn video_provider(
    config: &EngineConfig,
    chain: &CredentialChain,
    name: &str,
) -> Result<Box<dyn VideoProvider>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "veo" | "gemini" => Ok(Box::new(VeoProvider::new(
            config,
            chain.resolve(CredentialKind::Gemini),
        ))),
        "dryrun" => Ok(Box::new(DryrunVideoProvider::new(2))),
        other => bail!("unknown video provider '{other}' (available: veo, dryrun)"),
    }
}

fn load_garment(
    ingestor: &Ingestor,
    wardrobe: &Wardrobe,
    catalog_dir: &Path,
    slot: GarmentSlot,
    reference: &str,
) -> Result<ImagePayload> {
    let Ok(id) = reference.trim().parse::<u64>() else {
        return ingestor
            .load(reference)
            .with_context(|| format!("failed to load {} {reference}", slot.as_str()));
    };
    let Some(item) = wardrobe.get(id) else {
        bail!("no wardrobe item with id {id}");
    };
    if item.kind != slot {
        bail!(
            "wardrobe item {id} ({}) is a {}, not a {}",
            item.label,
            item.kind.as_str(),
            slot.as_str()
        );
    }
    let source = if item.reference.contains("://") || item.reference.starts_with("data:") {
        item.reference.clone()
    } else {
        catalog_dir.join(&item.reference).to_string_lossy().to_string()
    };
    ingestor
        .load(&source)
        .with_context(|| format!("failed to load wardrobe item {} ({})", item.id, item.label))
}

fn parse_credential(raw: &str) -> Result<CredentialKind> {
    CredentialKind::parse(raw)
        .with_context(|| format!("unknown provider '{raw}' (expected gemini or wavespeed)"))
}

fn parse_slot(raw: &str) -> Result<GarmentSlot> {
    GarmentSlot::parse(raw)
        .with_context(|| format!("unknown garment type '{raw}' (expected top, bottom, shoes)"))
}

fn parse_video_source(raw: &str) -> Result<VideoSource> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("composite") {
        return Ok(VideoSource::Composite);
    }
    match raw.parse::<usize>() {
        Ok(number @ 1..=4) => Ok(VideoSource::Pose(number - 1)),
        _ => bail!("--video-source must be 'composite' or a pose number 1-4 (got '{raw}')"),
    }
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow::anyhow!("{flag} must be a non-negative number of seconds, got {value}"))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{parse_video_source, seconds, Cli, Command, KeysCommand, PollArgs};
    use atelier_engine::VideoSource;

    #[test]
    fn try_on_flags_parse() {
        let cli = Cli::try_parse_from([
            "atelier",
            "try-on",
            "--person",
            "me.jpg",
            "--top",
            "3",
            "--provider",
            "flux",
            "--parallel",
            "--max-attempts",
            "10",
        ])
        .unwrap();
        let Command::TryOn(args) = cli.command else {
            panic!("expected try-on");
        };
        assert_eq!(args.top.as_deref(), Some("3"));
        assert!(args.parallel);
        assert_eq!(args.provider, "flux");
        assert_eq!(args.poll.max_attempts, Some(10));
        assert_eq!(args.poll.interval, 5.0);
    }

    #[test]
    fn compose_needs_four_images() {
        assert!(Cli::try_parse_from(["atelier", "compose", "a", "b", "c", "--out", "g.png"]).is_err());
        assert!(
            Cli::try_parse_from(["atelier", "compose", "a", "b", "c", "d", "--out", "g.png"]).is_ok()
        );
    }

    #[test]
    fn keys_subcommands_parse() {
        let cli = Cli::try_parse_from(["atelier", "keys", "set", "gemini", "abc"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Keys(KeysCommand::Set { ref provider, ref key }) if provider == "gemini" && key == "abc"
        ));
    }

    #[test]
    fn video_source_accepts_composite_or_pose_number() -> anyhow::Result<()> {
        assert_eq!(parse_video_source("composite")?, VideoSource::Composite);
        assert_eq!(parse_video_source("2")?, VideoSource::Pose(1));
        assert!(parse_video_source("0").is_err());
        assert!(parse_video_source("5").is_err());
        assert!(seconds(-1.0, "--interval").is_err());
        Ok(())
    }

    #[test]
    fn poll_flags_reject_unusable_durations() -> anyhow::Result<()> {
        assert!(seconds(1e30, "--max-wait").is_err());
        assert!(seconds(f64::NAN, "--max-wait").is_err());
        assert!(seconds(f64::INFINITY, "--interval").is_err());
        assert_eq!(seconds(1.5, "--interval")?, std::time::Duration::from_millis(1500));

        let zero = PollArgs {
            interval: 0.0,
            max_wait: None,
            max_attempts: None,
        };
        assert!(zero.policy().is_err());
        let huge_wait = PollArgs {
            interval: 5.0,
            max_wait: Some(1e30),
            max_attempts: None,
        };
        assert!(huge_wait.policy().is_err());
        Ok(())
    }
}
