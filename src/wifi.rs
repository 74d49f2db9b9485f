// ─── Paso 3: Módulo WiFi (Asociación como station) ───
//
// Una sola función pública: associate(). Valida credenciales, arranca la
// asociación y espera con reintentos acotados a que la radio tenga IP.
// Agotar el presupuesto es un resultado normal: la máquina de estados
// vuelve al portal de setup en lugar de quedarse colgada acá.

use std::net::Ipv4Addr;

use log::info;

use crate::error::NetworkError;
use crate::platform::{Clock, WifiRadio};
use crate::retry::RetryPolicy;

/// Límites del driver WiFi (802.11).
pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSPHRASE_LEN: usize = 64;

/// Asocia la radio a la red `ssid`.
///
/// Bloquea como mucho `policy.max_attempts × policy.inter_attempt_delay`.
/// Retorna la IP asignada por DHCP.
pub fn associate<R, C>(
    radio: &mut R,
    ssid: &str,
    passphrase: &str,
    policy: &RetryPolicy,
    clock: &C,
) -> Result<Ipv4Addr, NetworkError>
where
    R: WifiRadio,
    C: Clock,
{
    // ─── Validación de credenciales ───

    if ssid.is_empty() {
        return Err(NetworkError::InvalidCredentials("WiFi SSID not configured"));
    }
    if ssid.len() > MAX_SSID_LEN {
        return Err(NetworkError::InvalidCredentials("SSID too long"));
    }
    if passphrase.len() > MAX_PASSPHRASE_LEN {
        return Err(NetworkError::InvalidCredentials("Password too long"));
    }

    // Loguear longitud del password (nunca el password en sí)
    info!("WiFi password length: {} bytes", passphrase.len());

    // ─── Asociar y esperar IP ───

    info!("Connecting to '{}'...", ssid);
    radio.begin_association(ssid, passphrase)?;

    policy
        .run(clock, "WiFi association", |_| {
            if radio.is_connected() {
                Ok(())
            } else {
                Err(NetworkError::NotAssociated)
            }
        })
        .map_err(|e| NetworkError::AssociationFailed {
            attempts: e.attempts,
        })?;

    let ip = radio.ip_address().unwrap_or(Ipv4Addr::UNSPECIFIED);
    info!("WiFi connected! IP: {}", ip);
    Ok(ip)
}
