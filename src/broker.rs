// ─── Paso 3: BrokerSession (Sesión MQTT) ───
//
// Dueña de una única conexión al broker. El transporte (TLS o texto plano)
// se elige por número de puerto: 8883 = TLS, cualquier otro = plano.
// Hay clientes desplegados de las dos formas, la regla se mantiene así.
//
// connect() reintenta con tope fijo y nunca escala por su cuenta: si se
// agotan los intentos devuelve Unreachable y decide la máquina de estados.

use std::collections::BTreeSet;
use std::time::Duration;

use log::{info, warn};

use crate::commands::MessageHandler;
use crate::config_store::DeviceConfig;
use crate::error::BrokerError;
use crate::platform::{Clock, MqttTransport};
use crate::retry::RetryPolicy;

/// Puerto convencional de MQTT sobre TLS.
pub const TLS_PORT: u16 = 8883;

/// Tope de mensajes entregados por llamada a poll().
const MAX_MESSAGES_PER_POLL: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tls,
    Plain,
}

impl TransportKind {
    pub fn for_port(port: u16) -> Self {
        if port == TLS_PORT {
            TransportKind::Tls
        } else {
            TransportKind::Plain
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            TransportKind::Tls => "mqtts",
            TransportKind::Plain => "mqtt",
        }
    }
}

/// Todo lo que el transporte necesita para un intento de conexión.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.transport.scheme(), self.host, self.port)
    }
}

/// Resultado de un poll().
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// Mensajes entregados al handler.
    pub delivered: usize,
    /// El transporte volvió a conectarse por su cuenta desde el último
    /// poll. Re-suscribirse es responsabilidad del caller.
    pub reconnected: bool,
    /// El enlace se cayó desde el último poll.
    pub lost: bool,
}

pub struct BrokerSession<T: MqttTransport, C: Clock> {
    transport: T,
    clock: C,
    retry: RetryPolicy,
    connect_timeout: Duration,
    keep_alive: Duration,
    client_id: String,
    subscriptions: BTreeSet<String>,
    link_up: bool,
}

impl<T: MqttTransport, C: Clock> BrokerSession<T, C> {
    pub fn new(
        transport: T,
        clock: C,
        retry: RetryPolicy,
        connect_timeout: Duration,
        keep_alive: Duration,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            clock,
            retry,
            connect_timeout,
            keep_alive,
            client_id: client_id.into(),
            subscriptions: BTreeSet::new(),
            link_up: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(String::as_str)
    }

    fn options_for(&self, config: &DeviceConfig) -> ConnectOptions {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        ConnectOptions {
            host: config.broker_host.clone(),
            port: config.broker_port,
            transport: TransportKind::for_port(config.broker_port),
            client_id: self.client_id.clone(),
            username: non_empty(&config.broker_user),
            password: non_empty(&config.broker_pass),
            keep_alive: self.keep_alive,
            connect_timeout: self.connect_timeout,
        }
    }

    /// Conecta al broker configurado con reintentos acotados.
    ///
    /// Cada intento bloquea como mucho `connect_timeout`. Las suscripciones
    /// previas se olvidan: el caller se re-suscribe.
    pub fn connect(&mut self, config: &DeviceConfig) -> Result<(), BrokerError> {
        let options = self.options_for(config);

        if options.host.is_empty() {
            warn!("No MQTT broker configured");
            return Err(BrokerError::Unreachable { attempts: 0 });
        }

        match options.transport {
            TransportKind::Tls => info!("Using secure MQTT (TLS)"),
            TransportKind::Plain => info!("Using plain MQTT (no TLS)"),
        }
        info!("Connecting to MQTT broker {}...", options.url());

        self.transport.disconnect();
        self.subscriptions.clear();
        self.link_up = false;

        let transport = &mut self.transport;
        self.retry
            .run(&self.clock, "MQTT connect", |_| transport.connect(&options))
            .map_err(|e| BrokerError::Unreachable {
                attempts: e.attempts,
            })?;

        self.link_up = true;
        info!("Connected to MQTT broker.");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
        self.subscriptions.clear();
        self.link_up = false;
    }

    /// Registra interés en `topics`.
    pub fn subscribe(&mut self, topics: &[&str]) -> Result<(), BrokerError> {
        if !self.transport.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        for topic in topics {
            self.transport.subscribe(topic)?;
            self.subscriptions.insert(topic.to_string());
            info!("Subscribed to '{}'", topic);
        }
        Ok(())
    }

    /// Publica. Sin sesión devuelve `NotConnected`, nunca descarta en
    /// silencio.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if !self.transport.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        self.transport.publish(topic, payload)
    }

    /// Atiende la sesión: detecta cambios del enlace y entrega los mensajes
    /// pendientes a `handler`. Es el único punto de I/O de red del loop.
    pub fn poll<H: MessageHandler>(&mut self, handler: &mut H) -> PollReport {
        let mut report = PollReport::default();

        let up = self.transport.is_connected();
        if up && !self.link_up {
            info!("MQTT link restored");
            self.subscriptions.clear();
            report.reconnected = true;
        } else if !up && self.link_up {
            warn!("MQTT link lost");
            report.lost = true;
        }
        self.link_up = up;

        while report.delivered < MAX_MESSAGES_PER_POLL {
            let Some(command) = self.transport.poll() else {
                break;
            };
            if !self.subscriptions.contains(&command.topic) {
                warn!("Message on unsubscribed topic '{}' dropped", command.topic);
                continue;
            }
            handler.on_message(&command);
            report.delivered += 1;
        }

        report
    }
}
