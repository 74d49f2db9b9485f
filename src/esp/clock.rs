// ─── Reloj: ticks monotónicos + hora local vía SNTP ───

use std::time::{Duration, Instant};

use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::sntp::EspSntp;
use esp_idf_svc::sys;
use log::info;

use crate::platform::{Clock, TimeOfDay};

/// Años desde 1900. Antes de 2021 el RTC todavía no fue sincronizado.
const MIN_SYNCED_YEAR: i32 = 121;

#[derive(Debug, Clone, Copy)]
pub struct EspClock {
    boot: Instant,
}

impl EspClock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for EspClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for EspClock {
    fn ticks_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }

    fn sleep(&self, duration: Duration) {
        FreeRtos::delay_ms(duration.as_millis() as u32);
    }

    fn time_of_day(&self) -> Option<TimeOfDay> {
        // localtime_r respeta la TZ configurada en start_time_sync()
        let tm = unsafe {
            let mut now: sys::time_t = 0;
            sys::time(&mut now);
            let mut tm: sys::tm = core::mem::zeroed();
            sys::localtime_r(&now, &mut tm);
            tm
        };

        if tm.tm_year < MIN_SYNCED_YEAR {
            return None;
        }

        Some(TimeOfDay {
            hour: tm.tm_hour as u8,
            minute: tm.tm_min as u8,
            second: tm.tm_sec as u8,
        })
    }
}

/// Configura la zona horaria y arranca SNTP (servidores pool.ntp.org).
///
/// El handle debe mantenerse vivo: si se dropea, se detiene la sincronización.
pub fn start_time_sync(timezone: &str) -> Result<EspSntp<'static>> {
    std::env::set_var("TZ", timezone);
    unsafe {
        sys::tzset();
    }

    let sntp = EspSntp::new_default()?;
    info!("SNTP started, TZ={}", timezone);
    Ok(sntp)
}
