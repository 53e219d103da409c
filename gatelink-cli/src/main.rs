//! Command-line client for gate controllers
//!
//! Opens gates and administers their keys, parameters and name over BLE.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use data_encoding::HEXLOWER;
use gatelink_controller::ble::{self, BleGate};
use gatelink_controller::crypto::validate_key_material;
use gatelink_controller::{
    AuthSession, ControllerConfig, Deadline, KeyStore, ManagementClient, gatelink_home, key_store, own_key_record,
};
use gatelink_proto::{Action, KeyRecord, ParamId};

type Session = AuthSession<Deadline<BleGate>>;

#[derive(Parser)]
#[command(name = "gatelink")]
#[command(about = "Open and administer gate controllers over BLE")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for gates
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Print this client's key record, for an administrator to add
    Pubkey {
        /// Request the admin bit in the record
        #[arg(long)]
        admin: bool,
    },
    /// Open the gate
    Open {
        /// Device name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Open the gate and keep it open
    Hold {
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Close the gate
    Close {
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Manage the keys a gate accepts
    Keys {
        #[arg(short, long)]
        device: Option<String>,
        #[command(subcommand)]
        command: KeyCommands,
    },
    /// Read or change a gate parameter
    Param {
        #[arg(short, long)]
        device: Option<String>,
        #[command(subcommand)]
        command: ParamCommands,
    },
    /// Read or change the gate name
    Name {
        #[arg(short, long)]
        device: Option<String>,
        #[command(subcommand)]
        command: NameCommands,
    },
    /// Show the authentication audit log
    Log {
        #[arg(short, long)]
        device: Option<String>,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    List,
    /// Add a 33-byte key record given as hex
    Add { record: String },
    /// Delete a 33-byte key record given as hex
    Del { record: String },
}

#[derive(Subcommand)]
enum ParamCommands {
    /// Parameter name (e.g. open-duration) or number
    Get { id: String },
    Set { id: String, value: u32 },
}

#[derive(Subcommand)]
enum NameCommands {
    Get,
    Set { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let home = gatelink_home()?;
    let config = ControllerConfig::load_or_init(&home)?;

    match cli.command {
        Commands::Scan { duration } => {
            scan_gates(duration.unwrap_or(config.scan_secs)).await?;
        }
        Commands::Pubkey { admin } => {
            let keys = key_store::open_default(&home, &config)?;
            let record = own_key_record(keys.as_ref(), admin)?;
            println!("{}", HEXLOWER.encode(record.as_bytes()));
            log::info!("key held in {:?} store", keys.backing());
        }
        Commands::Open { device } => run_action(&config, &home, device, Action::Open).await?,
        Commands::Hold { device } => run_action(&config, &home, device, Action::OpenAndHold).await?,
        Commands::Close { device } => run_action(&config, &home, device, Action::Close).await?,
        Commands::Keys { device, command } => {
            let mut session = admin_session(&config, &home, device).await?;
            let result = manage_keys(&mut session, command).await;
            finish(session).await;
            result?;
        }
        Commands::Param { device, command } => {
            let mut session = admin_session(&config, &home, device).await?;
            let result = manage_param(&mut session, command).await;
            finish(session).await;
            result?;
        }
        Commands::Name { device, command } => {
            let mut session = admin_session(&config, &home, device).await?;
            let mut mgmt = ManagementClient::new(&mut session);
            let result = match command {
                NameCommands::Get => mgmt.name().await.map(|name| println!("{name}")),
                NameCommands::Set { name } => mgmt.set_name(&name).await,
            };
            finish(session).await;
            result?;
        }
        Commands::Log { device } => {
            let mut session = admin_session(&config, &home, device).await?;
            let result = ManagementClient::new(&mut session).audit_log().await;
            finish(session).await;
            for (i, entry) in result?.iter().enumerate() {
                let outcome = if entry.success { "ok" } else { "FAILED" };
                let action = Action::from_code(entry.action)
                    .map(|a| format!("{a:?}"))
                    .unwrap_or_else(|| entry.action.to_string());
                println!(
                    "{i:3} {outcome:6} {:>10}ms {} {action:12} {}",
                    entry.uptime_ms,
                    entry.address_string(),
                    HEXLOWER.encode(&entry.presented_key)
                );
            }
        }
    }

    Ok(())
}

async fn scan_gates(duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for gates ({duration} seconds)...");
    let adapter = ble::get_adapter().await?;
    let devices = ble::scan(&adapter, Duration::from_secs(duration)).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device.rssi.map(|r| format!("{r} dBm")).unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_gate { " [GATE]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }
    Ok(())
}

async fn connect(
    config: &ControllerConfig,
    home: &std::path::Path,
    target: Option<String>,
) -> Result<Session, Box<dyn std::error::Error>> {
    let keys: Arc<dyn KeyStore> = key_store::open_default(home, config)?;
    let adapter = ble::get_adapter().await?;

    println!("Scanning for gates...");
    let (peripheral, found) =
        ble::find_device(&adapter, target.as_deref(), Duration::from_secs(config.scan_secs)).await?;
    println!("Found device: {} ({})", found.name, found.address);

    println!("Connecting...");
    let gate = BleGate::attach(peripheral).await?;
    // no configured deadline means none at all
    let timeout = config.operation_timeout().unwrap_or(Duration::MAX);
    Ok(AuthSession::new(found.address, Deadline::new(gate, timeout), keys, config))
}

async fn run_action(
    config: &ControllerConfig,
    home: &std::path::Path,
    target: Option<String>,
    action: Action,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = connect(config, home, target).await?;
    let result = session.authenticate_with(action).await;
    finish(session).await;
    result?;
    println!("{action:?} accepted");
    Ok(())
}

async fn admin_session(
    config: &ControllerConfig,
    home: &std::path::Path,
    target: Option<String>,
) -> Result<Session, Box<dyn std::error::Error>> {
    let mut session = connect(config, home, target).await?;
    match session.authenticate_with(Action::AdminMode).await {
        Ok(outcome) if outcome.admin => Ok(session),
        Ok(_) => {
            finish(session).await;
            Err("this key has no admin rights on the device".into())
        }
        Err(e) => {
            finish(session).await;
            Err(e.into())
        }
    }
}

async fn finish(mut session: Session) {
    if let Err(e) = session.transport().inner().disconnect().await {
        log::warn!("disconnect: {e}");
    }
    session.disconnected();
}

fn parse_record(hex: &str) -> Result<KeyRecord, Box<dyn std::error::Error>> {
    let bytes = data_encoding::HEXLOWER_PERMISSIVE.decode(hex.trim().as_bytes())?;
    Ok(KeyRecord::decode(&bytes)?)
}

async fn manage_keys(session: &mut Session, command: KeyCommands) -> Result<(), Box<dyn std::error::Error>> {
    let mut mgmt = ManagementClient::new(session);
    match command {
        KeyCommands::List => {
            let listing = mgmt.list_keys().await?;
            println!("{} keys:", listing.total);
            for entry in &listing.keys {
                let admin = if entry.record.is_admin() { " [ADMIN]" } else { "" };
                println!(
                    "  {:3} {:9} {}{}",
                    entry.index,
                    entry.record.key_type().to_string(),
                    HEXLOWER.encode(entry.record.as_bytes()),
                    admin
                );
            }
            if let Some(failure) = listing.first_error {
                println!("  (key {} could not be read: {})", failure.index, failure.error);
            }
        }
        KeyCommands::Add { record } => {
            let record = parse_record(&record)?;
            validate_key_material(&record)?;
            mgmt.add_key(&record).await?;
            println!("Key added");
        }
        KeyCommands::Del { record } => {
            mgmt.delete_key(&parse_record(&record)?).await?;
            println!("Key deleted");
        }
    }
    Ok(())
}

async fn manage_param(session: &mut Session, command: ParamCommands) -> Result<(), Box<dyn std::error::Error>> {
    let mut mgmt = ManagementClient::new(session);
    match command {
        ParamCommands::Get { id } => {
            let id = ParamId::parse(&id).ok_or("unknown parameter")?;
            println!("{id} = {}", mgmt.get_param(id).await?);
        }
        ParamCommands::Set { id, value } => {
            let id = ParamId::parse(&id).ok_or("unknown parameter")?;
            mgmt.set_param(id, value).await?;
            println!("{id} = {value}");
        }
    }
    Ok(())
}
