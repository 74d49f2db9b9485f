// ─── Plataforma ESP-IDF ───
//
// Implementa las interfaces de `platform` sobre esp-idf-svc / esp-idf-hal.
// Solo se compila para target_os = "espidf".

mod clock;
mod http;
mod hw;
mod mqtt;
mod nvs;
mod wifi;

use anyhow::Result;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use crate::platform::{Board, LogSink, Platform};

pub use clock::{start_time_sync, EspClock};
pub use http::EspHttp;
pub use hw::{GpioOutput, InternalTemperature};
pub use mqtt::EspMqtt;
pub use nvs::NvsStore;
pub use wifi::EspRadio;

pub struct EspPlatform;

impl Platform for EspPlatform {
    type Store = NvsStore;
    type Radio = EspRadio;
    type Mqtt = EspMqtt;
    type Http = EspHttp;
    type Output = GpioOutput;
    type Sensor = InternalTemperature;
    type Sink = LogSink;
    type Clock = EspClock;
}

/// Toma los periféricos y arma una instancia de cada capacidad.
pub fn board() -> Result<Board<EspPlatform>> {
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let radio = EspRadio::new(peripherals.modem, sysloop)?;
    let output = GpioOutput::new(peripherals.pins.gpio8)?;
    let sensor = InternalTemperature::new(peripherals.temp_sensor)?;
    let http = EspHttp::start()?;

    Ok(Board {
        store: NvsStore::new(nvs_partition),
        radio,
        mqtt: EspMqtt::new(),
        http,
        output,
        sensor,
        sink: LogSink,
        clock: EspClock::new(),
    })
}

/// Reinicio del chip. No retorna.
pub fn restart() -> ! {
    unsafe {
        esp_idf_svc::sys::esp_restart();
    }
    #[allow(unreachable_code)]
    loop {}
}
