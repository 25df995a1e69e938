use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "facecam", about = "Control the facecam overlay daemon")]
struct Cli {
    /// Print raw JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn the camera on if it is off, off if it is on
    Toggle,
    /// Turn the camera on
    On,
    /// Turn the camera off
    Off,
    /// Clear the current error (reloads the models if they failed)
    Retry,
    /// Show session status
    Status,
    /// List local V4L2 capture devices
    Devices,
}

#[zbus::proxy(
    interface = "org.facecam.Session1",
    default_service = "org.facecam.Session1",
    default_path = "/org/facecam/Session1"
)]
trait Session {
    fn toggle_camera(&self) -> zbus::Result<String>;
    fn retry(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

fn print_snapshot(raw: &str, json: bool) -> Result<()> {
    if json {
        println!("{raw}");
        return Ok(());
    }
    let v: serde_json::Value = serde_json::from_str(raw)?;
    let flag = |k: &str| if v[k].as_bool().unwrap_or(false) { "yes" } else { "no" };
    println!("phase:         {}", v["phase"].as_str().unwrap_or("?"));
    println!("camera on:     {}", flag("camera_requested"));
    println!("camera ready:  {}", flag("camera_ready"));
    println!("models ready:  {}", flag("models_ready"));
    println!("polling:       {}", flag("polling"));
    if let Some(err) = v["last_error"].as_str() {
        println!("error:         {err}");
        println!("               run `facecam retry` to clear it");
    }
    Ok(())
}

fn camera_requested(raw: &str) -> Result<bool> {
    let v: serde_json::Value = serde_json::from_str(raw)?;
    Ok(v["camera_requested"].as_bool().unwrap_or(false))
}

fn list_devices(json: bool) -> Result<()> {
    let devices = facecam_hw::V4lCamera::list_devices();
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else if devices.is_empty() {
        println!("No capture devices found");
    } else {
        for d in devices {
            println!("{}\t{} ({}, {})", d.path, d.name, d.driver, d.bus);
        }
    }
    Ok(())
}

async fn connect() -> Result<SessionProxy<'static>> {
    let conn = zbus::Connection::session().await?;
    let proxy = SessionProxy::new(&conn).await?;
    tracing::debug!("connected to facecamd");
    Ok(proxy)
}

/// Toggle only if the camera is not already in the wanted state.
async fn set_camera(want_on: bool) -> Result<String> {
    let proxy = connect().await?;
    let current = proxy.status().await?;
    if camera_requested(&current)? == want_on {
        return Ok(current);
    }
    Ok(proxy.toggle_camera().await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let raw = match cli.command {
        Commands::Devices => return list_devices(cli.json),
        Commands::Toggle => connect().await?.toggle_camera().await?,
        Commands::On => set_camera(true).await?,
        Commands::Off => set_camera(false).await?,
        Commands::Retry => connect().await?.retry().await?,
        Commands::Status => connect().await?.status().await?,
    };

    print_snapshot(&raw, cli.json)
}
