//! Orchestrates every component: startup, the poll/tick/render main loop,
//! and graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::DriverConfig;
use crate::content::ResponseStatus;
use crate::error::DriverError;
use crate::hardware::{Panel, SerialTransport};
use crate::limits::DriverLimits;
use crate::poll_client::{ContentClient, ErrorHandler};
use crate::push_server::PushServer;
use crate::queue::ContentQueue;

pub struct Driver {
    limits: DriverLimits,

    panel: Panel,
    serial: SerialTransport,
    queue: Arc<ContentQueue>,
    client: ContentClient,
    error_handler: ErrorHandler,

    push_server: Option<PushServer>,
    /// Push-server -> driver-loop signal: "a push just landed, reset the
    /// poll timer." Keeps the queue lock and the client's state from ever
    /// needing to be held together.
    push_reset_rx: Option<crossbeam_channel::Receiver<()>>,

    running: Arc<AtomicBool>,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Result<Self, DriverError> {
        let limits = DriverLimits::default();

        let panel = Panel::new(
            &config.module_layout,
            config.module_width as usize,
            config.module_height as usize,
        )?;
        let (panel_height, panel_width) = panel.dimensions();
        info!("display dimensions: {panel_width}x{panel_height}");

        let serial = SerialTransport::new(
            config.serial_device.clone(),
            config.serial_baudrate,
            config.dev_mode,
            limits.serial,
        );

        let queue = Arc::new(ContentQueue::new(limits.queue));
        let client_backoff = crate::limits::ClientBackoff {
            timeout_secs: config.poll_timeout_secs,
            ..limits.client
        };
        let client = ContentClient::new(
            config.poll_endpoint.clone(),
            config.auth.clone(),
            client_backoff,
            limits.content,
        );
        let error_handler = ErrorHandler::new(config.error_fallback);

        let mut push_server = None;
        let mut push_reset_rx = None;
        if config.enable_push {
            let (tx, rx) = crossbeam_channel::unbounded();
            let push_queue = Arc::clone(&queue);
            let display_dims = Some((panel_width as u32, panel_height as u32));
            let callback: crate::push_server::PushCallback = Arc::new(move |content| {
                push_queue.replace_or_add(content);
                let _ = tx.send(());
            });

            let server = PushServer::start(
                &config.push_host,
                config.push_port,
                config.auth.clone(),
                limits.content,
                limits.server,
                display_dims,
                callback,
            )
            .map_err(|e| DriverError::PushBind {
                host: config.push_host.clone(),
                port: config.push_port,
                source: e,
            })?;
            push_server = Some(server);
            push_reset_rx = Some(rx);
        }

        Ok(Self {
            limits,
            panel,
            serial,
            queue,
            client,
            error_handler,
            push_server,
            push_reset_rx,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn run(&mut self) {
        info!("starting driver");
        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            self.drain_push_resets();
            self.poll_for_content();
            self.render_frame();
            std::thread::sleep(Duration::from_millis(self.limits.loop_timing.sleep_interval_ms));
        }

        self.shutdown();
    }

    fn drain_push_resets(&mut self) {
        let Some(rx) = &self.push_reset_rx else {
            return;
        };
        let mut reset = false;
        while rx.try_recv().is_ok() {
            reset = true;
        }
        if reset {
            self.client.reset_poll_timer();
        }
    }

    fn poll_for_content(&mut self) {
        if !self.client.should_poll() {
            return;
        }

        let response = match self.client.fetch() {
            Some(r) => r,
            None => {
                warn!("failed to fetch content, using fallback");
                match self.error_handler.fallback_response() {
                    Some(r) => r,
                    None => return,
                }
            }
        };

        if response.content.is_some() {
            self.error_handler.set_last_successful(&response);
        }

        match response.status {
            ResponseStatus::Updated => {
                if let Some(content) = response.content {
                    let (panel_height, panel_width) = self.panel.dimensions();
                    if let Err(e) = content
                        .validate_display_dimensions(panel_width as u32, panel_height as u32)
                    {
                        error!("rejecting polled content: {e}");
                        return;
                    }
                    self.queue.replace_or_add(content);
                }
            }
            ResponseStatus::Clear => {
                info!("server requested display clear");
                self.queue.clear();
                self.clear_display();
            }
            ResponseStatus::NoChange => {}
        }
    }

    fn clear_display(&mut self) {
        let blank = self.panel.blank_matrix();
        match self.panel.set_content(&blank) {
            Ok(bytes) => {
                self.serial.write(&bytes);
            }
            Err(e) => error!("failed to build blank frame: {e}"),
        }
    }

    fn render_frame(&mut self) {
        let Some(frame) = self.queue.update() else {
            return;
        };

        let (panel_height, panel_width) = self.panel.dimensions();
        if frame.width != panel_width as u32 || frame.height != panel_height as u32 {
            error!(
                "frame dimensions ({}x{}) don't match display ({panel_width}x{panel_height})",
                frame.width, frame.height
            );
            return;
        }

        let data = match frame.decode_data() {
            Ok(d) => d,
            Err(e) => {
                error!("error decoding frame: {e}");
                return;
            }
        };

        match self
            .panel
            .set_content_from_packed(&data, frame.width as usize, frame.height as usize)
        {
            Ok(bytes) => {
                self.serial.write(&bytes);
            }
            Err(e) => error!("error rendering frame: {e}"),
        }
    }

    pub fn shutdown(&mut self) {
        info!("stopping driver");
        self.running.store(false, Ordering::SeqCst);

        if let Some(server) = self.push_server.take() {
            server.stop();
        }

        self.queue.clear();
        self.clear_display();
        self.serial.close();

        info!("driver stopped");
    }
}
