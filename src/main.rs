//! Nuimo emulator
//!
//! Powers on the emulated peripheral and plays the role of the dial: input
//! is read line by line from stdin.

use anyhow::anyhow;
#[cfg(feature = "config-file")]
use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nuimo_emulator::ble::SimulatedStack;
use nuimo_emulator::{
    DeviceId, EmulatorConfig, Peripheral, PeripheralListener, PlatformEvent, PlatformStack,
    SwipeDirection,
};

const HELP: &str = "\
commands:
  press | release | click      button
  swipe <left|right|up|down>   touch gesture
  rotate <turns>               dial rotation, e.g. 0.05 or -0.1
  status                       print peripheral state as JSON
  on | off                     power the peripheral
  quit
simulated backend only:
  connect <id> | disconnect <id>
  subscribe <characteristic> | unsubscribe <characteristic>
  read <characteristic>
  write-led <hex>";

/// One stdin command
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Press,
    Release,
    Click,
    Swipe(SwipeDirection),
    Rotate(f64),
    Status,
    On,
    Off,
    Help,
    Quit,
    Connect(DeviceId),
    Disconnect(DeviceId),
    Subscribe(String, bool),
    Read(String),
    WriteLed(Vec<u8>),
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or_else(|| "empty command".to_string())?;
        let arg = words.next();
        let required = |what: &str| arg.ok_or_else(|| format!("{} needs {}", name, what));

        let command = match name.to_ascii_lowercase().as_str() {
            "press" => Command::Press,
            "release" => Command::Release,
            "click" => Command::Click,
            "swipe" => Command::Swipe(required("a direction")?.parse()?),
            "rotate" => Command::Rotate(
                required("a delta")?
                    .parse()
                    .map_err(|e| format!("bad rotation delta: {}", e))?,
            ),
            "status" => Command::Status,
            "on" => Command::On,
            "off" => Command::Off,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "connect" => Command::Connect(DeviceId::from(required("a device id")?)),
            "disconnect" => Command::Disconnect(DeviceId::from(required("a device id")?)),
            "subscribe" => Command::Subscribe(required("a characteristic")?.to_string(), true),
            "unsubscribe" => Command::Subscribe(required("a characteristic")?.to_string(), false),
            "read" => Command::Read(required("a characteristic")?.to_string()),
            "write-led" => Command::WriteLed(
                hex::decode(required("a hex payload")?).map_err(|e| format!("bad hex: {}", e))?,
            ),
            other => return Err(format!("unknown command: {} (try help)", other)),
        };
        Ok(command)
    }
}

/// Logs what the peripheral reports
struct LoggingListener;

impl PeripheralListener for LoggingListener {
    fn on_connect(&self, device: &DeviceId) {
        info!("✅ Central connected: {}", device);
    }

    fn on_disconnect(&self, device: &DeviceId) {
        info!("Central disconnected: {}", device);
    }

    fn on_advertising_started(&self) {
        info!("📡 Advertising");
    }

    fn on_advertising_failed(&self, reason: &str) {
        error!("❌ Advertising failed: {}", reason);
    }

    fn on_initialization_failed(&self, reason: &str) {
        error!("❌ Initialization failed: {}", reason);
    }

    fn on_led_matrix_write(&self, device: &DeviceId, payload: &[u8]) {
        info!("💡 LED matrix from {}: {}", device, hex::encode(payload));
    }
}

fn load_config() -> anyhow::Result<EmulatorConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("NUIMO_CONFIG").ok())
        .map(PathBuf::from);

    #[cfg(feature = "config-file")]
    let config = EmulatorConfig::load(path.as_deref())
        .with_context(|| format!("loading configuration {:?}", path))?;

    #[cfg(not(feature = "config-file"))]
    let config = {
        if path.is_some() {
            return Err(anyhow!("built without the config-file feature"));
        }
        let config = EmulatorConfig::default();
        config.validate()?;
        config
    };

    Ok(config)
}

type Platform = (
    Arc<dyn PlatformStack>,
    Option<Arc<SimulatedStack>>,
    mpsc::UnboundedReceiver<PlatformEvent>,
);

#[cfg(all(target_os = "linux", feature = "linux"))]
async fn build_platform() -> Platform {
    match nuimo_emulator::ble::LinuxStack::new().await {
        Ok((stack, events)) => {
            info!("{}", stack.adapter_info());
            (stack as Arc<dyn PlatformStack>, None, events)
        }
        Err(e) => {
            warn!("BlueZ unavailable ({}), using the simulated backend", e);
            simulated_platform()
        }
    }
}

#[cfg(not(all(target_os = "linux", feature = "linux")))]
async fn build_platform() -> Platform {
    info!("No radio backend compiled in, using the simulated backend");
    simulated_platform()
}

fn simulated_platform() -> Platform {
    let (stack, events) = SimulatedStack::with_event_channel();
    let stack = Arc::new(stack);
    (stack.clone() as Arc<dyn PlatformStack>, Some(stack), events)
}

/// Apply one command. Returns `false` to stop.
fn execute(
    command: Command,
    peripheral: &Peripheral,
    simulated: Option<&SimulatedStack>,
) -> anyhow::Result<bool> {
    match command {
        Command::Press => {
            peripheral.press_button();
        }
        Command::Release => {
            peripheral.release_button();
        }
        Command::Click => {
            peripheral.press_button();
            peripheral.release_button();
        }
        Command::Swipe(direction) => {
            peripheral.swipe(direction);
        }
        Command::Rotate(delta) => {
            peripheral.rotate(delta);
        }
        Command::Status => println!("{}", serde_json::to_string_pretty(&peripheral.snapshot())?),
        Command::On => peripheral.power_on()?,
        Command::Off => peripheral.power_off(),
        Command::Help => println!("{}", HELP),
        Command::Quit => return Ok(false),
        central => {
            let stack = simulated.ok_or_else(|| anyhow!("only available with the simulated backend"))?;
            let characteristic = |name: &str| {
                peripheral
                    .catalog()
                    .characteristic_by_name(name)
                    .map(|c| c.uuid)
                    .ok_or_else(|| anyhow!("unknown characteristic: {}", name))
            };
            let device = peripheral
                .connected_device()
                .unwrap_or_else(|| DeviceId::from("simulated-central"));

            match central {
                Command::Connect(device) => stack.central_connect(&device),
                Command::Disconnect(device) => stack.central_disconnect(&device),
                Command::Subscribe(name, enable) => {
                    stack.central_set_notifications(&device, characteristic(&name)?, enable);
                }
                Command::Read(name) => {
                    stack.central_read(&device, characteristic(&name)?);
                }
                Command::WriteLed(payload) => {
                    stack.central_write(&device, characteristic("led_matrix")?, payload);
                }
                _ => {}
            }
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = load_config()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚀 Starting Nuimo emulator as {:?}", config.device_name);

    let (platform, simulated, events) = build_platform().await;
    let peripheral = Arc::new(Peripheral::from_config(platform, config));
    peripheral.add_listener(Arc::new(LoggingListener));

    let runner = {
        let peripheral = peripheral.clone();
        tokio::spawn(async move { peripheral.run(events).await })
    };

    if let Err(e) = peripheral.power_on() {
        warn!("Continuing powered off: {}", e);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        match execute(command, &peripheral, simulated.as_deref()) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => error!("{}", e),
        }
    }

    peripheral.power_off();
    runner.abort();
    info!("👋 Bye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("press".parse::<Command>(), Ok(Command::Press));
        assert_eq!("swipe left".parse::<Command>(), Ok(Command::Swipe(SwipeDirection::Left)));
        assert_eq!("rotate -0.25".parse::<Command>(), Ok(Command::Rotate(-0.25)));
        assert_eq!(
            "subscribe button".parse::<Command>(),
            Ok(Command::Subscribe("button".to_string(), true))
        );
        assert_eq!(
            "write-led 00ff".parse::<Command>(),
            Ok(Command::WriteLed(vec![0x00, 0xff]))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!("rotate".parse::<Command>().is_err());
        assert!("rotate fast".parse::<Command>().is_err());
        assert!("swipe sideways".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
        assert!("write-led zz".parse::<Command>().is_err());
    }
}
