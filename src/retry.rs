// ─── Paso 3: Política de reintentos acotados ───
//
// Los reintentos bloquean el loop de control (no hay otro thread que atienda
// HTTP mientras tanto), así que siempre tienen un tope fijo de intentos.
// El peor caso de bloqueo es max_attempts × (intento + delay).

use std::fmt::Display;
use std::time::Duration;

use log::{info, warn};

use crate::platform::Clock;

/// Cuántas veces reintentar y cuánto esperar entre intentos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub inter_attempt_delay: Duration,
}

/// Todos los intentos fallaron. `last_error` es el del último intento.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: Option<E>,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, inter_attempt_delay: Duration) -> Self {
        Self {
            max_attempts,
            inter_attempt_delay,
        }
    }

    /// Peor caso de tiempo dormido entre intentos.
    pub fn worst_case_delay(&self) -> Duration {
        self.inter_attempt_delay * self.max_attempts.saturating_sub(1)
    }

    /// Ejecuta `attempt` hasta que tenga éxito o se agote el presupuesto.
    ///
    /// `attempt` recibe el número de intento (1-based). Entre intentos se
    /// duerme `inter_attempt_delay` usando el `Clock` inyectado, así los tests
    /// pueden usar un reloj falso en lugar de delays reales.
    pub fn run<T, E, C, F>(&self, clock: &C, what: &str, mut attempt: F) -> Result<T, Exhausted<E>>
    where
        E: Display,
        C: Clock,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut last_error = None;

        for n in 1..=self.max_attempts {
            match attempt(n) {
                Ok(value) => {
                    if n > 1 {
                        info!("{} succeeded on attempt {}", what, n);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!("{} attempt {}/{} failed: {}", what, n, self.max_attempts, e);
                    last_error = Some(e);
                }
            }

            if n < self.max_attempts {
                clock.sleep(self.inter_attempt_delay);
            }
        }

        Err(Exhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}
