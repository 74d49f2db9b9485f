// ─── Paso 3: DeviceStateMachine (Ciclo de vida de la conectividad) ───
//
//   Unprovisioned ──/save──▶ ConnectingWiFi ──ok──▶ ConnectingBroker ──ok──▶ Running
//        ▲                        │                       │                  │  ▲
//        └──────── agotado ───────┘                       │           link ▼  │ link
//        └──────────────── broker inalcanzable ───────────┘              Degraded
//
// Un solo thread de control llama a step() en loop. Los únicos puntos donde
// el dispositivo deja de atender HTTP son la espera de asociación WiFi y los
// reintentos de conexión al broker; ambos están acotados por RetryPolicy.
//
// Perder el WiFi en Running dispara un Restart: se descarta la sesión y se
// vuelve al estado inicial que la config permita. El firmware puede además
// reiniciar el chip (ver Settings::hard_restart).

use std::fmt;

use log::{error, info, warn};

use crate::broker::BrokerSession;
use crate::commands::{CommandDispatcher, COMMAND_TOPICS};
use crate::config_store::{ConfigStore, DeviceConfig};
use crate::error::{BrokerError, DeviceError};
use crate::platform::{Board, Clock, HttpResponder, Platform, TemperatureSensor, WifiRadio};
use crate::portal::{AccessPointSettings, HttpRequest, ProvisioningPortal, Submission};
use crate::settings::{BrokerFailurePolicy, Settings};
use crate::telemetry::{DeviceId, TelemetryInputs, TelemetryPublisher};
use crate::wifi;

/// Requests HTTP atendidos como máximo por tick.
const MAX_REQUESTS_PER_TICK: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unprovisioned,
    ConnectingWiFi,
    ConnectingBroker,
    Running,
    /// WiFi arriba pero el enlace MQTT cayó: se sigue atendiendo HTTP y la
    /// telemetría se descarta hasta recuperar el broker.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// Llegó una config nueva por el portal.
    Reprovisioned { persisted: bool },
    /// La supervisión encontró el WiFi caído.
    WifiLost,
}

impl RestartReason {
    /// Un reboot del chip solo tiene sentido si la config sobrevive en NVS.
    pub fn survives_reboot(&self) -> bool {
        match self {
            RestartReason::Reprovisioned { persisted } => *persisted,
            RestartReason::WifiLost => true,
        }
    }
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::Reprovisioned { persisted: true } => f.write_str("new settings saved"),
            RestartReason::Reprovisioned { persisted: false } => {
                f.write_str("new settings (not persisted)")
            }
            RestartReason::WifiLost => f.write_str("Wi-Fi connection lost"),
        }
    }
}

/// Resultado de un step().
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// La secuencia de conexión volvió a empezar.
    Restarted(RestartReason),
}

pub struct DeviceStateMachine<P: Platform> {
    state: ConnectionState,
    config: DeviceConfig,
    settings: Settings,
    device_id: DeviceId,
    store: ConfigStore<P::Store>,
    portal: ProvisioningPortal,
    radio: P::Radio,
    http: P::Http,
    session: BrokerSession<P::Mqtt, P::Clock>,
    publisher: TelemetryPublisher,
    dispatcher: CommandDispatcher<P::Output>,
    sensor: P::Sensor,
    sink: P::Sink,
    clock: P::Clock,
    last_supervision_ms: u64,
}

fn initial_state(config: &DeviceConfig) -> ConnectionState {
    if config.is_provisioned() {
        ConnectionState::ConnectingWiFi
    } else {
        ConnectionState::Unprovisioned
    }
}

impl<P: Platform> DeviceStateMachine<P> {
    /// Toma posesión de todo el hardware y carga la config de NVS.
    pub fn new(board: Board<P>, settings: Settings, device_id: DeviceId) -> Self {
        let Board {
            store,
            radio,
            mqtt,
            http,
            output,
            sensor,
            sink,
            clock,
        } = board;

        let mut store = ConfigStore::new(store);
        let config = store.load();
        let state = initial_state(&config);

        let session = BrokerSession::new(
            mqtt,
            clock.clone(),
            settings.broker_retry,
            settings.connect_timeout,
            settings.keep_alive,
            format!("ESP32Client-{}", device_id),
        );
        let publisher = TelemetryPublisher::new(
            &device_id,
            settings.firmware_version,
            settings.publish_interval,
        );
        let dispatcher = CommandDispatcher::new(output, settings.diagnostics_enabled);

        info!("Device ID: {}", device_id);
        info!("Initial state: {:?}", state);

        Self {
            state,
            config,
            settings,
            device_id,
            store,
            portal: ProvisioningPortal::new(AccessPointSettings::default()),
            radio,
            http,
            session,
            publisher,
            dispatcher,
            sensor,
            sink,
            clock,
            last_supervision_ms: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn telemetry_topic(&self) -> &str {
        self.publisher.topic()
    }

    pub fn diagnostics_enabled(&self) -> bool {
        self.dispatcher.diagnostics_enabled()
    }

    /// Un tick del loop de control.
    ///
    /// Solo falla si la plataforma no puede levantar el AP de setup; todo
    /// lo demás se resuelve con transiciones.
    pub fn step(&mut self) -> Result<Step, DeviceError> {
        match self.state {
            ConnectionState::Unprovisioned => self.step_unprovisioned(),
            ConnectionState::ConnectingWiFi => {
                self.step_connecting_wifi();
                Ok(Step::Continue)
            }
            ConnectionState::ConnectingBroker => {
                self.step_connecting_broker();
                Ok(Step::Continue)
            }
            ConnectionState::Running | ConnectionState::Degraded => Ok(self.step_online()),
        }
    }

    // ─── Estados ───

    fn step_unprovisioned(&mut self) -> Result<Step, DeviceError> {
        if !self.portal.is_active() {
            self.portal.activate(&mut self.radio)?;
        }

        Ok(match self.service_http() {
            Some(submission) => self.apply_submission(submission),
            None => Step::Continue,
        })
    }

    fn step_connecting_wifi(&mut self) {
        self.portal.deactivate();

        info!("Connecting to Wi-Fi...");
        match wifi::associate(
            &mut self.radio,
            &self.config.ssid,
            &self.config.passphrase,
            &self.settings.wifi_retry,
            &self.clock,
        ) {
            Ok(_) => self.transition(ConnectionState::ConnectingBroker),
            Err(e) => {
                warn!("Wi-Fi connection failed: {}", e);
                self.transition(ConnectionState::Unprovisioned);
            }
        }
    }

    fn step_connecting_broker(&mut self) {
        match self.connect_broker() {
            Ok(()) => {
                self.publisher.restart_cadence();
                self.last_supervision_ms = self.clock.ticks_ms();
                self.transition(ConnectionState::Running);
            }
            Err(e) => self.broker_failed(e),
        }
    }

    fn step_online(&mut self) -> Step {
        if let Some(submission) = self.service_http() {
            return self.apply_submission(submission);
        }

        let report = self.session.poll(&mut self.dispatcher);
        if report.lost && self.state == ConnectionState::Running {
            self.transition(ConnectionState::Degraded);
        }
        if report.reconnected {
            match self.session.subscribe(&COMMAND_TOPICS) {
                Ok(()) => self.transition(ConnectionState::Running),
                Err(e) => warn!("Re-subscribe failed: {}", e),
            }
        }

        let now = self.clock.ticks_ms();
        let supervision_ms = self.settings.supervision_interval.as_millis() as u64;
        if now.saturating_sub(self.last_supervision_ms) >= supervision_ms {
            self.last_supervision_ms = now;

            if !self.radio.is_connected() {
                error!("Wi-Fi connection lost. Restarting...");
                return self.restart(RestartReason::WifiLost);
            }

            if self.state == ConnectionState::Degraded {
                info!("Attempting broker reconnect...");
                match self.connect_broker() {
                    Ok(()) => self.transition(ConnectionState::Running),
                    Err(e) => {
                        self.broker_failed(e);
                        if self.state == ConnectionState::Unprovisioned {
                            return Step::Continue;
                        }
                    }
                }
            }
        }

        if self.publisher.is_due(now) {
            self.publish_telemetry(now);
        }

        Step::Continue
    }

    // ─── Helpers ───

    fn transition(&mut self, next: ConnectionState) {
        if next != self.state {
            info!("state: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Atiende HTTP hasta vaciar la cola o recibir un `/save`. Cada
    /// submission se procesa sola, así dispara exactamente un restart.
    fn service_http(&mut self) -> Option<Submission> {
        let mut submission = None;

        for _ in 0..MAX_REQUESTS_PER_TICK {
            let portal = &mut self.portal;
            let store = &mut self.store;
            let served = self.http.serve_next(&mut |request: &HttpRequest| {
                let outcome = portal.handle(request, store);
                if outcome.submission.is_some() {
                    submission = outcome.submission;
                }
                outcome.response
            });

            if !served || submission.is_some() {
                break;
            }
        }

        submission
    }

    fn apply_submission(&mut self, submission: Submission) -> Step {
        let Submission { config, persisted } = submission;
        if !persisted {
            warn!("Using unsaved settings until the next power cycle");
        }
        self.config = config;
        self.restart(RestartReason::Reprovisioned { persisted })
    }

    /// Restart lógico: se descarta la sesión y se vuelve al estado inicial
    /// que permita la config.
    ///
    /// Tras un `/save` manda la config recibida. Tras perder el WiFi se
    /// relee NVS, igual que haría un reboot del chip: una config que no se
    /// pudo guardar no sobrevive a ninguno de los dos caminos.
    fn restart(&mut self, reason: RestartReason) -> Step {
        warn!("Restarting connectivity sequence: {}", reason);
        self.session.disconnect();
        self.portal.deactivate();
        if reason == RestartReason::WifiLost {
            self.config = self.store.load();
        }
        self.transition(initial_state(&self.config));
        Step::Restarted(reason)
    }

    fn connect_broker(&mut self) -> Result<(), BrokerError> {
        self.session.connect(&self.config)?;
        self.session.subscribe(&COMMAND_TOPICS)
    }

    fn broker_failed(&mut self, e: BrokerError) {
        warn!("Unable to connect to MQTT broker: {}", e);
        match self.settings.broker_failure {
            BrokerFailurePolicy::Reprovision => {
                warn!("Switching to AP mode...");
                self.session.disconnect();
                self.transition(ConnectionState::Unprovisioned);
            }
            BrokerFailurePolicy::KeepRetrying => {
                info!("Will retry broker connection");
            }
        }
    }

    fn publish_telemetry(&mut self, now: u64) {
        let inputs = TelemetryInputs {
            temperature: self.sensor.read_celsius(),
            wifi_connected: self.radio.is_connected(),
            ip: self.radio.ip_address(),
            time: self.clock.time_of_day(),
            actuator_high: self.dispatcher.output_is_high(),
        };

        let mirror = if self.dispatcher.diagnostics_enabled() {
            Some(&mut self.sink)
        } else {
            None
        };

        self.publisher
            .publish(now, &inputs, &mut self.session, mirror);
    }
}
