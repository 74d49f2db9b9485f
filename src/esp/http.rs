// ─── Servidor HTTP del portal ───
//
// EspHttpServer atiende cada request en su propio thread. Los handlers no
// tocan la config: mandan el request al loop de control por un canal y
// esperan la respuesta. Así el portal corre en el mismo thread que el
// resto de la máquina de estados.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::time::Duration;

use anyhow::Result;
use embedded_svc::http::Method;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::server::{Configuration as HttpConfig, EspHttpServer};
use log::warn;

use crate::platform::HttpResponder;
use crate::portal::{HttpMethod, HttpRequest, HttpResponse};

/// Requests esperando al loop de control.
const QUEUE_DEPTH: usize = 4;

/// Lo que espera un handler antes de contestar 503 (el loop puede estar
/// bloqueado en la asociación WiFi o en los reintentos del broker).
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

const ROUTES: [(&str, Method); 3] = [
    ("/", Method::Get),
    ("/save", Method::Get),
    ("/save", Method::Post),
];

struct PendingRequest {
    request: HttpRequest,
    reply: Sender<HttpResponse>,
}

fn busy() -> HttpResponse {
    HttpResponse {
        status: 503,
        content_type: "text/plain",
        body: "Device busy, try again".into(),
    }
}

pub struct EspHttp {
    _server: EspHttpServer<'static>,
    requests: Receiver<PendingRequest>,
}

impl EspHttp {
    pub fn start() -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(QUEUE_DEPTH);
        let mut server = EspHttpServer::new(&HttpConfig::default())?;

        for (uri, method) in ROUTES {
            let tx: SyncSender<PendingRequest> = tx.clone();
            server.fn_handler::<anyhow::Error, _>(uri, method, move |mut req| {
                let http_method = match method {
                    Method::Post => HttpMethod::Post,
                    _ => HttpMethod::Get,
                };

                // Body del POST (formulario URL-encoded)
                let mut body = [0u8; 512];
                let len = match http_method {
                    HttpMethod::Post => req.read(&mut body)?,
                    HttpMethod::Get => 0,
                };
                let body_str = std::str::from_utf8(&body[..len]).unwrap_or("");

                let request = HttpRequest::from_uri(http_method, req.uri(), body_str);
                let (reply_tx, reply_rx) = mpsc::channel();
                let response = match tx.try_send(PendingRequest {
                    request,
                    reply: reply_tx,
                }) {
                    Ok(()) => reply_rx.recv_timeout(REPLY_TIMEOUT).unwrap_or_else(|_| busy()),
                    Err(_) => busy(),
                };

                req.into_response(
                    response.status,
                    None,
                    &[("Content-Type", response.content_type)],
                )?
                .write_all(response.body.as_bytes())?;
                Ok(())
            })?;
        }

        Ok(Self {
            _server: server,
            requests: rx,
        })
    }
}

impl HttpResponder for EspHttp {
    fn serve_next(&mut self, handler: &mut dyn FnMut(&HttpRequest) -> HttpResponse) -> bool {
        let Ok(pending) = self.requests.try_recv() else {
            return false;
        };

        let response = handler(&pending.request);
        if pending.reply.send(response).is_err() {
            warn!("HTTP client gone before response for {}", pending.request.path);
        }
        true
    }
}
