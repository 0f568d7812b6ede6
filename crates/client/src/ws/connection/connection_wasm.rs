//! WASM/Web-specific WebSocket transport using web_sys::WebSocket.

use kelmah_shared::TransportError;
use wasm_bindgen::prelude::*;
use web_sys::{js_sys, CloseEvent, Event, MessageEvent, WebSocket};

use super::{Transport, TransportEvent, TransportSender};

/// Browser WebSocket transport.
///
/// The JS callbacks are owned by the transport and detached on close, so a
/// closed socket never reports into a newer session.
#[derive(Default)]
pub struct WsTransport {
    socket: Option<OpenSocket>,
}

struct OpenSocket {
    ws: WebSocket,
    _onopen: Closure<dyn FnMut(Event)>,
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
    _onclose: Closure<dyn FnMut(CloseEvent)>,
    _onerror: Closure<dyn FnMut(Event)>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &str, events: TransportSender) -> Result<(), TransportError> {
        self.close();

        let ws = WebSocket::new(url)
            .map_err(|e| TransportError::Open(format!("Failed to create WebSocket: {:?}", e)))?;

        let open_events = events.clone();
        let onopen = Closure::wrap(Box::new(move |_: Event| {
            let socket_id = uuid::Uuid::new_v4().to_string();
            crate::log_info!("WebSocket onopen fired ({})", socket_id);
            open_events.emit(TransportEvent::Opened { socket_id });
        }) as Box<dyn FnMut(Event)>);
        ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));

        let message_events = events.clone();
        let onmessage = Closure::wrap(Box::new(move |e: MessageEvent| {
            if let Ok(text) = e.data().dyn_into::<js_sys::JsString>() {
                message_events.emit(TransportEvent::Frame(text.into()));
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

        let close_events = events.clone();
        let onclose = Closure::wrap(Box::new(move |e: CloseEvent| {
            let reason = if e.reason().is_empty() {
                format!("Code {}", e.code())
            } else {
                e.reason()
            };
            crate::log_info!("WebSocket onclose: {}", reason);
            close_events.emit(TransportEvent::Closed { reason });
        }) as Box<dyn FnMut(CloseEvent)>);
        ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));

        // Browsers fire a plain `Event` here, never an `ErrorEvent`.
        let onerror = Closure::wrap(Box::new(move |e: Event| {
            crate::log_error!("WebSocket onerror fired ({})", e.type_());
            events.emit(TransportEvent::Error("WebSocket error".to_string()));
        }) as Box<dyn FnMut(Event)>);
        ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));

        self.socket = Some(OpenSocket {
            ws,
            _onopen: onopen,
            _onmessage: onmessage,
            _onclose: onclose,
            _onerror: onerror,
        });
        Ok(())
    }

    fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(TransportError::NotOpen);
        };
        if socket.ws.ready_state() != WebSocket::OPEN {
            return Err(TransportError::NotOpen);
        }
        socket
            .ws
            .send_with_str(&frame)
            .map_err(|e| TransportError::Send(format!("{:?}", e)))
    }

    fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.ws.set_onopen(None);
            socket.ws.set_onmessage(None);
            socket.ws.set_onclose(None);
            socket.ws.set_onerror(None);
            if let Err(e) = socket.ws.close_with_code(1000) {
                crate::log_warn!("WebSocket close failed: {:?}", e);
            }
        }
    }
}
