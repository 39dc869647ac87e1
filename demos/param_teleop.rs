// Keyboard slider teleop: 1/2 channel, T/P/I/D parameter, Up/Down nudge,
// [/] step size, Space pause/resume, Q quit
//
// Sliders start at the device's own values once the first snapshot with a
// seeded baseline arrives on pidlink/state/snapshot.
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use pidlink::config::{RAW_MAX, TOPIC_CMD_LINK, TOPIC_CMD_PARAM, TOPIC_SNAPSHOT};
use pidlink::messages::{ChannelId, LinkControl, ParamEvent, ParamId};
use pidlink::telemetry::CommandBaseline;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

const STEPS: [u16; 3] = [1, 10, 100]; // slider positions per key press

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let pub_param = session.declare_publisher(TOPIC_CMD_PARAM).await?;
    let pub_link = session.declare_publisher(TOPIC_CMD_LINK).await?;
    let sub_snapshot = session.declare_subscriber(TOPIC_SNAPSHOT).await?;

    info!("Controls: 1/2=channel, T/P/I/D=param, Up/Down=nudge, [/]=step, Space=pause, Q=quit");

    let mut sliders = Sliders::default();

    enable_raw_mode()?;
    let result = async {
        loop {
            while let Ok(Some(sample)) = sub_snapshot.try_recv() {
                let payload = sample.payload().to_bytes();
                match serde_json::from_slice::<Value>(&payload) {
                    Ok(snapshot) => sliders.seed(&snapshot),
                    Err(e) => warn!("Failed to parse snapshot: {}", e),
                }
            }

            // Poll for key with 20ms timeout
            if !event::poll(Duration::from_millis(20))? {
                continue;
            }
            let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
                continue;
            };
            if kind != KeyEventKind::Press && kind != KeyEventKind::Repeat {
                continue;
            }

            match code {
                KeyCode::Char('1') => sliders.channel = ChannelId::One,
                KeyCode::Char('2') => sliders.channel = ChannelId::Two,
                KeyCode::Char('t') => sliders.param = ParamId::Target,
                KeyCode::Char('p') => sliders.param = ParamId::Kp,
                KeyCode::Char('i') => sliders.param = ParamId::Ki,
                KeyCode::Char('d') => sliders.param = ParamId::Kd,
                KeyCode::Char(']') => sliders.step_idx = (sliders.step_idx + 1).min(2),
                KeyCode::Char('[') => sliders.step_idx = sliders.step_idx.saturating_sub(1),

                KeyCode::Up | KeyCode::Down => {
                    let event = sliders.nudge(code == KeyCode::Up);
                    pub_param.put(serde_json::to_string(&event)?).await?;
                    info!("{}{} slider -> {}", event.param, event.channel, event.raw);
                    continue;
                }

                KeyCode::Char(' ') => {
                    sliders.paused = !sliders.paused;
                    let control = if sliders.paused {
                        LinkControl::Pause
                    } else {
                        LinkControl::Resume
                    };
                    pub_link.put(serde_json::to_string(&control)?).await?;
                    info!("{:?}", control);
                    continue;
                }

                KeyCode::Char('q') | KeyCode::Esc => break,
                _ => continue,
            }
            info!(
                "Selected {}{} (step {})",
                sliders.param, sliders.channel, STEPS[sliders.step_idx]
            );
        }
        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
    }
    .await;
    disable_raw_mode()?;

    result
}

struct Sliders {
    channel: ChannelId,
    param: ParamId,
    step_idx: usize,
    paused: bool,
    /// [channel][param] slider positions
    raw: [[u16; 4]; 2],
    seeded: [bool; 2],
}

impl Default for Sliders {
    fn default() -> Self {
        Self {
            channel: ChannelId::One,
            param: ParamId::Target,
            step_idx: 1,
            paused: false,
            raw: [[RAW_MAX / 2; 4]; 2],
            seeded: [false; 2],
        }
    }
}

impl Sliders {
    /// Adopt the device's values for a channel the first time they are known
    fn seed(&mut self, snapshot: &Value) {
        for id in ChannelId::ALL {
            let slot = id.index();
            if self.seeded[slot] {
                continue;
            }
            let baseline = &snapshot["channels"][slot]["baseline"];
            if baseline.is_null() {
                continue;
            }
            let baseline: CommandBaseline = match serde_json::from_value(baseline.clone()) {
                Ok(b) => b,
                Err(e) => {
                    warn!("Bad baseline for channel {}: {}", id, e);
                    continue;
                }
            };
            for (p, param) in ParamId::ALL.iter().enumerate() {
                self.raw[slot][p] = baseline.raw(*param).min(RAW_MAX);
            }
            self.seeded[slot] = true;
            info!("Channel {} sliders seeded: {:?}", id, self.raw[slot]);
        }
    }

    fn nudge(&mut self, up: bool) -> ParamEvent {
        let p = param_slot(self.param);
        let slot = &mut self.raw[self.channel.index()][p];
        let step = STEPS[self.step_idx];
        *slot = if up {
            slot.saturating_add(step).min(RAW_MAX)
        } else {
            slot.saturating_sub(step)
        };
        ParamEvent {
            param: self.param,
            channel: self.channel,
            raw: *slot,
        }
    }
}

fn param_slot(param: ParamId) -> usize {
    ParamId::ALL.iter().position(|p| *p == param).unwrap_or(0)
}
