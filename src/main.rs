#[cfg(feature = "gui")]
use std::path::PathBuf;
#[cfg(feature = "gui")]
use std::sync::Arc;

#[cfg(feature = "gui")]
use clap::Parser;
#[cfg(feature = "gui")]
use eframe::egui;
#[cfg(feature = "gui")]
use parking_lot::Mutex;

#[cfg(feature = "gui")]
use drumsqnc::{
    AudioOutput, EngineConfig, InstrumentKind, MidiOutputDevice, Monitored, PatternStore,
    SharedPort, TransportController,
};

#[cfg(feature = "gui")]
#[derive(Debug, Parser)]
#[command(name = "drumsqnc", about = "16-step drum machine sequencer")]
struct Args {
    /// JSON engine configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Connect to the first MIDI output whose name contains this
    #[arg(long)]
    port: Option<String>,

    /// Starting tempo, overrides the config file
    #[arg(long)]
    bpm: Option<f32>,

    /// Print the available MIDI outputs and exit
    #[arg(long)]
    list_ports: bool,
}

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drumsqnc=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, path = %path.display(), "cannot load config");
                std::process::exit(2);
            }
        },
        None => EngineConfig::default(),
    };
    if let Some(port) = args.port {
        config.output_port = Some(port);
    }
    if let Some(bpm) = args.bpm {
        config.bpm = bpm;
    }
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid settings");
        std::process::exit(2);
    }

    if args.list_ports {
        for (i, name) in MidiOutputDevice::available_ports(&config.client_name)
            .iter()
            .enumerate()
        {
            println!("{i}: {name}");
        }
        return Ok(());
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 560.0])
            .with_title("DRUMSQNC - Drum Sequencer"),
        ..Default::default()
    };

    eframe::run_native(
        "DRUMSQNC",
        options,
        Box::new(move |_cc| Ok(Box::new(SequencerApp::new(config)))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    eprintln!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

#[cfg(feature = "gui")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Instrument(InstrumentKind),
    GlobalSteps,
}

#[cfg(feature = "gui")]
struct SequencerApp {
    transport: TransportController,
    output: Arc<Mutex<Monitored<MidiOutputDevice>>>,
    audio_output: Option<AudioOutput>,

    // UI state
    client_name: String,
    available_midi_ports: Vec<String>,
    selected_port: Option<usize>,
    preview: bool,
    tab: Tab,
}

#[cfg(feature = "gui")]
impl SequencerApp {
    fn new(config: EngineConfig) -> Self {
        let mut device = MidiOutputDevice::new(config.client_name.clone());
        let available_midi_ports = MidiOutputDevice::available_ports(&config.client_name);

        let mut selected_port = None;
        if let Some(needle) = &config.output_port {
            match device.connect_by_name(needle) {
                Ok(()) => {
                    selected_port = available_midi_ports.iter().position(|n| n.contains(needle));
                }
                Err(e) => tracing::warn!(error = %e, "MIDI output not connected"),
            }
        }

        let output = Arc::new(Mutex::new(Monitored::new(device)));
        let port: SharedPort = output.clone();
        let transport = TransportController::new(PatternStore::drum_kit(), port, &config);

        Self {
            transport,
            output,
            audio_output: None,
            client_name: config.client_name,
            available_midi_ports,
            selected_port,
            preview: false,
            tab: Tab::Instrument(InstrumentKind::Bass),
        }
    }

    fn set_preview(&mut self, enabled: bool) {
        if enabled && self.audio_output.is_none() {
            self.audio_output = AudioOutput::new();
        }
        let monitor = if enabled {
            self.audio_output.as_ref().map(AudioOutput::monitor)
        } else {
            None
        };
        self.preview = monitor.is_some();
        self.output.lock().set_monitor(monitor);
    }

    fn select_port(&mut self, index: usize) {
        let result = self.output.lock().port_mut().connect(index);
        match result {
            Ok(()) => self.selected_port = Some(index),
            Err(e) => tracing::warn!(error = %e, "MIDI output not connected"),
        }
    }

    fn output_bar(&mut self, ui: &mut egui::Ui) {
        let mut selected_port_changed = None;
        ui.horizontal(|ui| {
            ui.label("MIDI Output:");
            if self.available_midi_ports.is_empty() {
                ui.label("No MIDI ports available");
            } else {
                egui::ComboBox::from_id_source("midi_port")
                    .selected_text(
                        self.selected_port
                            .and_then(|i| self.available_midi_ports.get(i))
                            .map(String::as_str)
                            .unwrap_or("Select port..."),
                    )
                    .show_ui(ui, |ui| {
                        for (i, port_name) in self.available_midi_ports.iter().enumerate() {
                            if ui
                                .selectable_label(self.selected_port == Some(i), port_name)
                                .clicked()
                            {
                                selected_port_changed = Some(i);
                            }
                        }
                    });
            }
            if ui.button("Rescan").clicked() {
                self.available_midi_ports = MidiOutputDevice::available_ports(&self.client_name);
            }

            ui.add_space(20.0);
            let mut preview = self.preview;
            if ui.checkbox(&mut preview, "Audio preview").changed() {
                self.set_preview(preview);
            }
        });

        if let Some(port_idx) = selected_port_changed {
            self.select_port(port_idx);
        }
    }

    fn transport_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let label = if self.transport.is_playing() {
                "⏸ Stop"
            } else {
                "▶ Play"
            };
            if ui.button(label).clicked() {
                self.transport.toggle_play();
            }

            if ui.button("⏮ Cue").clicked() {
                self.transport.cue();
            }

            ui.add_space(20.0);

            ui.label("BPM:");
            let mut bpm = self.transport.bpm();
            if ui
                .add(egui::Slider::new(&mut bpm, 40.0..=240.0).step_by(1.0))
                .changed()
            {
                if let Err(e) = self.transport.set_bpm(bpm) {
                    tracing::warn!(error = %e, "tempo rejected");
                }
            }
            if self.transport.is_playing() {
                let running = self.transport.clock_interval().map(|d| d.as_secs_f64() * 1000.0);
                if let Some(ms) = running {
                    ui.label(format!("{ms:.1} ms/step"));
                }
            }
        });
    }

    fn tab_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            for kind in InstrumentKind::ALL {
                ui.selectable_value(&mut self.tab, Tab::Instrument(kind), kind.name());
            }
            ui.selectable_value(&mut self.tab, Tab::GlobalSteps, "Global Steps");
        });
    }

    /// Authored step currently sounding, if playing.
    fn playing_step(&self) -> Option<u8> {
        self.transport
            .is_playing()
            .then(|| self.transport.current_step() as u8 + 1)
    }

    fn instrument_panel(&mut self, ui: &mut egui::Ui, kind: InstrumentKind) {
        let snapshot = self.transport.patterns().snapshot();
        let Some(track) = snapshot.iter().find(|t| t.kind() == kind) else {
            return;
        };

        ui.heading(format!("{} ({})", kind.name(), track.pitch()));
        ui.add_space(10.0);

        let mut changes = Vec::new();
        ui.horizontal(|ui| {
            for (i, &value) in track.controls().iter().enumerate() {
                let index = i + 1;
                let mut value = value;
                ui.vertical(|ui| {
                    ui.label(kind.control_label(index));
                    if ui
                        .add(egui::Slider::new(&mut value, 0..=127).vertical())
                        .changed()
                    {
                        changes.push((index, value));
                    }
                });
                ui.add_space(20.0);
            }
        });
        for (index, value) in changes {
            if let Err(e) = self.transport.send_control(kind, index, value) {
                tracing::warn!(error = %e, "control rejected");
            }
        }

        ui.add_space(20.0);
        self.step_row(ui, kind);
    }

    fn global_steps(&mut self, ui: &mut egui::Ui) {
        for kind in InstrumentKind::ALL {
            ui.horizontal(|ui| {
                ui.add_sized([80.0, 30.0], egui::Label::new(kind.name()));
                self.step_row(ui, kind);
                if ui.small_button("Clear").clicked() {
                    self.transport.patterns().clear_track(kind);
                }
            });
        }
    }

    fn step_row(&mut self, ui: &mut egui::Ui, kind: InstrumentKind) {
        let snapshot = self.transport.patterns().snapshot();
        let Some(track) = snapshot.iter().find(|t| t.kind() == kind) else {
            return;
        };
        let playing_step = self.playing_step();

        ui.horizontal(|ui| {
            for step in 1..=16u8 {
                let is_current = playing_step == Some(step);
                let step_enabled = track.has_step(step);

                let button = egui::Button::new(format!("{step}"))
                    .min_size(egui::vec2(40.0, 30.0))
                    .fill(if is_current {
                        egui::Color32::from_rgb(100, 200, 100)
                    } else if step_enabled {
                        egui::Color32::from_rgb(60, 60, 200)
                    } else {
                        egui::Color32::from_rgb(40, 40, 40)
                    });

                if ui.add(button).clicked() {
                    if let Err(e) = self.transport.patterns().toggle_step(kind, step) {
                        tracing::warn!(error = %e, "step rejected");
                    }
                }
                if step % 4 == 0 {
                    ui.add_space(6.0);
                }
            }
        });
    }
}

#[cfg(feature = "gui")]
impl eframe::App for SequencerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("DRUMSQNC - Drum Sequencer");
            ui.add_space(10.0);

            self.output_bar(ui);
            ui.add_space(10.0);
            self.transport_bar(ui);

            ui.separator();
            self.tab_bar(ui);
            ui.add_space(10.0);

            match self.tab {
                Tab::Instrument(kind) => self.instrument_panel(ui, kind),
                Tab::GlobalSteps => self.global_steps(ui),
            }

            // Info
            ui.separator();
            ui.label("Click steps to enable/disable them");
            let connected = self.output.lock().port().is_connected();
            if !connected && !self.preview {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    "⚠ No MIDI output connected - playback is silent",
                );
            }
        });
    }
}
