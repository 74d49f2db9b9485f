// ─── Radio WiFi sobre esp-idf-svc ───
//
// Un solo driver con las dos interfaces (STA + AP) creado al boot. El AP de
// setup y la station se alternan cambiando la configuración, sin recrear
// el driver: el modem se toma una sola vez.

use std::net::Ipv4Addr;

use anyhow::{anyhow, Result};
use embedded_svc::ipv4 as embedded_ipv4;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, peripheral},
    netif::{EspNetif, NetifConfiguration, NetifStack},
    wifi::{
        AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration,
        EspWifi, WifiDriver,
    },
};
use log::{info, warn};

use crate::error::NetworkError;
use crate::platform::WifiRadio;
use crate::portal::AccessPointSettings;

/// IP del portal de setup.
const AP_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

fn radio_err(e: impl std::fmt::Display) -> NetworkError {
    NetworkError::Radio(e.to_string())
}

pub struct EspRadio {
    wifi: BlockingWifi<EspWifi<'static>>,
}

impl EspRadio {
    pub fn new(
        modem: impl peripheral::Peripheral<P = Modem> + 'static,
        sysloop: EspSystemEventLoop,
    ) -> Result<Self> {
        let driver = WifiDriver::new(modem, sysloop.clone(), None)?;

        let sta_netif = EspNetif::new(NetifStack::Sta)?;

        // AP con IP estática 192.168.4.1 y servidor DHCP
        let ap_netif_config = NetifConfiguration {
            flags: 0,
            got_ip_event_id: None,
            lost_ip_event_id: None,
            key: "WIFI_AP_DEF"
                .try_into()
                .map_err(|_| anyhow!("netif key too long"))?,
            description: "ap".try_into().map_err(|_| anyhow!("netif description too long"))?,
            route_priority: 10,
            ip_configuration: Some(embedded_ipv4::Configuration::Router(
                embedded_ipv4::RouterConfiguration {
                    subnet: embedded_ipv4::Subnet {
                        gateway: AP_GATEWAY,
                        mask: embedded_ipv4::Mask(24),
                    },
                    dhcp_enabled: true,
                    dns: None,
                    secondary_dns: None,
                },
            )),
            stack: NetifStack::Ap,
            custom_mac: None,
        };
        let ap_netif = EspNetif::new_with_conf(&ap_netif_config)?;

        let wifi = EspWifi::wrap_all(driver, sta_netif, ap_netif)?;
        let wifi = BlockingWifi::wrap(wifi, sysloop)?;

        Ok(Self { wifi })
    }

    fn ensure_started(&mut self) -> Result<(), NetworkError> {
        if !self.wifi.is_started().map_err(radio_err)? {
            info!("Starting WiFi...");
            self.wifi.start().map_err(radio_err)?;
        }
        Ok(())
    }

    /// Canal del AP buscado, si aparece en el scan. Conectar con el canal
    /// correcto es más rápido.
    fn scan_channel(&mut self, ssid: &str) -> Option<u8> {
        info!("Scanning for networks...");
        match self.wifi.scan() {
            Ok(aps) => {
                let channel = aps.into_iter().find(|ap| ap.ssid == ssid).map(|ap| ap.channel);
                info!("Found AP '{}' on channel {:?}", ssid, channel.unwrap_or(0));
                channel
            }
            Err(e) => {
                warn!("WiFi scan failed: {}", e);
                None
            }
        }
    }
}

impl WifiRadio for EspRadio {
    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<(), NetworkError> {
        let ap_config = AccessPointConfiguration {
            ssid: settings
                .ssid
                .try_into()
                .map_err(|_| NetworkError::InvalidCredentials("AP SSID too long"))?,
            password: settings
                .password
                .try_into()
                .map_err(|_| NetworkError::InvalidCredentials("AP password too long"))?,
            channel: settings.channel,
            auth_method: AuthMethod::WPA2Personal,
            max_connections: settings.max_connections,
            ..Default::default()
        };

        self.wifi
            .set_configuration(&Configuration::AccessPoint(ap_config))
            .map_err(radio_err)?;
        self.ensure_started()?;

        // Esperar a que la interfaz del AP esté lista
        FreeRtos::delay_ms(500);
        Ok(())
    }

    fn begin_association(&mut self, ssid: &str, passphrase: &str) -> Result<(), NetworkError> {
        let auth_method = if passphrase.is_empty() {
            info!("WiFi password empty, using open network");
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        if self.wifi.is_connected().unwrap_or(false) {
            self.wifi.wifi_mut().disconnect().map_err(radio_err)?;
        }

        // Config default para poder hacer start() y scan()
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration::default()))
            .map_err(radio_err)?;
        self.ensure_started()?;

        let channel = self.scan_channel(ssid);

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: ssid
                    .try_into()
                    .map_err(|_| NetworkError::InvalidCredentials("SSID too long"))?,
                password: passphrase
                    .try_into()
                    .map_err(|_| NetworkError::InvalidCredentials("Password too long"))?,
                channel,
                auth_method,
                ..Default::default()
            }))
            .map_err(radio_err)?;

        // connect() del driver no bloquea: el progreso se ve en is_connected()
        self.wifi.wifi_mut().connect().map_err(radio_err)
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.is_up().unwrap_or(false)
    }

    fn ip_address(&self) -> Option<Ipv4Addr> {
        self.wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
            .filter(|ip| !ip.is_unspecified())
    }

    fn mac_address(&self) -> Result<[u8; 6], NetworkError> {
        self.wifi.wifi().sta_netif().get_mac().map_err(radio_err)
    }
}
