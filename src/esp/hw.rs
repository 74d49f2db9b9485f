// ─── GPIO y sensor de temperatura interno ───

use anyhow::Result;
use esp_idf_hal::gpio::{Gpio8, Output, PinDriver};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::temp_sensor::{TempSensor, TempSensorConfig, TempSensorDriver};

use crate::error::RuntimeError;
use crate::platform::{DigitalOutput, TemperatureSensor};

/// Salida controlada por `gpio/control` (el LED de la placa en GPIO8).
pub struct GpioOutput {
    pin: PinDriver<'static, Gpio8, Output>,
}

impl GpioOutput {
    pub fn new(pin: Gpio8) -> Result<Self> {
        Ok(Self {
            pin: PinDriver::output(pin)?,
        })
    }
}

impl DigitalOutput for GpioOutput {
    fn set_level(&mut self, high: bool) -> Result<(), RuntimeError> {
        let result = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        result.map_err(|e| RuntimeError::Actuator(e.to_string()))
    }

    fn is_high(&self) -> bool {
        self.pin.is_set_high()
    }
}

pub struct InternalTemperature {
    driver: TempSensorDriver<'static>,
}

impl InternalTemperature {
    pub fn new(sensor: impl Peripheral<P = TempSensor> + 'static) -> Result<Self> {
        let mut driver = TempSensorDriver::new(&TempSensorConfig::default(), sensor)?;
        driver.enable()?;
        Ok(Self { driver })
    }
}

impl TemperatureSensor for InternalTemperature {
    fn read_celsius(&mut self) -> Result<f32, RuntimeError> {
        self.driver
            .get_celsius()
            .map_err(|e| RuntimeError::SensorRead(e.to_string()))
    }
}
