// ─── Paso 3: Comandos entrantes por MQTT ───
//
// El broker entrega (topic, payload) y el dispatcher lo traduce a una
// acción local. Corre dentro de BrokerSession::poll(), en el mismo thread
// que atiende HTTP: nada de lo que hace acá puede bloquear.

use log::{info, warn};

use crate::error::BrokerError;
use crate::platform::DigitalOutput;

pub const TOPIC_GPIO_CONTROL: &str = "gpio/control";
pub const TOPIC_UART_CONTROL: &str = "uart/control";

/// Topics a los que el dispositivo se suscribe al conectar.
pub const COMMAND_TOPICS: [&str; 2] = [TOPIC_UART_CONTROL, TOPIC_GPIO_CONTROL];

/// Mensaje entrante tal como llega del broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Command {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Quien consume los mensajes entregados por `BrokerSession::poll`.
pub trait MessageHandler {
    fn on_message(&mut self, command: &Command);
}

/// Acción ya validada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// `gpio/control`: "1" = HIGH, "0" = LOW.
    SetOutput(bool),
    /// `uart/control`: "1"/"0" habilita el espejo de telemetría.
    SetDiagnostics(bool),
}

impl DeviceCommand {
    /// `Ok(None)` para topics que no son comandos; `MalformedPayload` si el
    /// topic es conocido pero el payload no es "1" ni "0".
    pub fn parse(command: &Command) -> Result<Option<Self>, BrokerError> {
        let build: fn(bool) -> DeviceCommand = match command.topic.as_str() {
            TOPIC_GPIO_CONTROL => DeviceCommand::SetOutput,
            TOPIC_UART_CONTROL => DeviceCommand::SetDiagnostics,
            _ => return Ok(None),
        };

        match std::str::from_utf8(&command.payload).map(str::trim) {
            Ok("1") => Ok(Some(build(true))),
            Ok("0") => Ok(Some(build(false))),
            _ => Err(BrokerError::MalformedPayload {
                topic: command.topic.clone(),
            }),
        }
    }
}

/// Dueño del actuador y del flag de diagnóstico.
pub struct CommandDispatcher<O: DigitalOutput> {
    output: O,
    diagnostics: bool,
}

impl<O: DigitalOutput> CommandDispatcher<O> {
    pub fn new(mut output: O, diagnostics: bool) -> Self {
        // Arrancar siempre en LOW
        if let Err(e) = output.set_level(false) {
            warn!("Failed to reset output: {}", e);
        }
        Self {
            output,
            diagnostics,
        }
    }

    pub fn output_is_high(&self) -> bool {
        self.output.is_high()
    }

    pub fn diagnostics_enabled(&self) -> bool {
        self.diagnostics
    }

    fn apply(&mut self, command: DeviceCommand) {
        match command {
            DeviceCommand::SetOutput(high) => match self.output.set_level(high) {
                Ok(()) => info!("{}", if high { "GPIO Pin ON" } else { "GPIO Pin OFF" }),
                Err(e) => warn!("{}", e),
            },
            DeviceCommand::SetDiagnostics(enabled) => {
                self.diagnostics = enabled;
                info!(
                    "{}",
                    if enabled {
                        "UART Output Enabled"
                    } else {
                        "UART Output Disabled"
                    }
                );
            }
        }
    }
}

impl<O: DigitalOutput> MessageHandler for CommandDispatcher<O> {
    fn on_message(&mut self, command: &Command) {
        match DeviceCommand::parse(command) {
            Ok(Some(cmd)) => self.apply(cmd),
            Ok(None) => info!("Ignoring message on '{}'", command.topic),
            Err(e) => warn!("Dropping command: {}", e),
        }
    }
}
