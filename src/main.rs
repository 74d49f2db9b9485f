// ─── Paso 3: MQTT Telemetry (Firmware) ───
//
// El ESP32 ya sabe conectarse al WiFi y provisionarse por browser. Ahora
// además habla MQTT: publica telemetría en status/<deviceId> y obedece
// comandos en gpio/control y uart/control.
//
// Toda la lógica vive en la librería (DeviceStateMachine). Acá solo se arma
// el hardware y se corre el loop de control.

// ─── Firmware (ESP32) ───

#[cfg(target_os = "espidf")]
mod firmware {
    use std::time::Duration;

    use esp_idf_hal::delay::FreeRtos;
    #[allow(unused_imports)]
    use esp_idf_svc::sys as _;
    use log::{error, info, warn};

    use paso_03_mqtt_telemetry::esp;
    use paso_03_mqtt_telemetry::platform::WifiRadio;
    use paso_03_mqtt_telemetry::settings::{CONTROL_LOOP_TICK_MS, TIMEZONE};
    use paso_03_mqtt_telemetry::telemetry::DeviceId;
    use paso_03_mqtt_telemetry::{DeviceStateMachine, Settings, Step};

    // ─── Punto de entrada ───
    //
    // Patrón main() → run(): main() no retorna Result, así que no puede usar ?.
    // Si run() falla, logueamos el error, esperamos 10s y reiniciamos el chip.

    pub fn main() {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();

        info!("paso-03-mqtt-telemetry v{}", env!("CARGO_PKG_VERSION"));

        if let Err(e) = run() {
            error!("Error fatal: {:?}", e);
            error!("Reiniciando en 10 segundos...");
            std::thread::sleep(Duration::from_secs(10));
            esp::restart();
        }
    }

    fn run() -> anyhow::Result<()> {
        // ─── Inicialización del sistema ───

        let board = esp::board()?;
        let device_id = DeviceId::from_mac(board.radio.mac_address()?);

        // SNTP corre en background; el handle tiene que seguir vivo
        let _sntp = esp::start_time_sync(TIMEZONE)?;

        let settings = Settings::default();
        let hard_restart = settings.hard_restart;
        let restart_delay = settings.restart_delay;

        let mut machine = DeviceStateMachine::new(board, settings, device_id);
        info!("Telemetry topic: {}", machine.telemetry_topic());

        // ─── Loop de control ───

        info!("Entering main loop...");
        loop {
            match machine.step()? {
                Step::Continue => {}
                Step::Restarted(reason) => {
                    // Sin la config en NVS un reboot volvería al portal
                    if hard_restart && reason.survives_reboot() {
                        warn!("Restarting chip in {:?}...", restart_delay);
                        std::thread::sleep(restart_delay);
                        esp::restart();
                    }
                }
            }

            FreeRtos::delay_ms(CONTROL_LOOP_TICK_MS);
        }
    }
}

#[cfg(target_os = "espidf")]
fn main() {
    firmware::main();
}

// ─── Host ───

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("paso-03-mqtt-telemetry runs on the ESP32; use `cargo test --lib` on the host");
}
