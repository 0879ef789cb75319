//! Recording encoder backend for pipeline tests.

use crate::encoder::{EncoderBackend, EncoderParams, EncoderSession};
use crate::error::EncoderError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RecordLog {
    pub opened: Vec<EncoderParams>,
    pub repeats: Vec<u32>,
    pub frame_lens: Vec<usize>,
    pub closed: usize,
    pub cleaned: usize,
}

#[derive(Clone, Default)]
pub struct RecordingBackend {
    log: Arc<Mutex<RecordLog>>,
    fail_open: bool,
    fail_send: bool,
    send_delay: Option<Duration>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn failing_sends() -> Self {
        Self {
            fail_send: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            send_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn log(&self) -> RecordLog {
        self.log.lock().unwrap().clone()
    }
}

impl EncoderBackend for RecordingBackend {
    fn open(&self, params: &EncoderParams) -> Result<Box<dyn EncoderSession>, EncoderError> {
        if self.fail_open {
            return Err(EncoderError::Open("refused by test backend".to_string()));
        }
        self.log.lock().unwrap().opened.push(params.clone());
        Ok(Box::new(RecordingSession {
            log: Arc::clone(&self.log),
            fail_send: self.fail_send,
            send_delay: self.send_delay,
        }))
    }
}

struct RecordingSession {
    log: Arc<Mutex<RecordLog>>,
    fail_send: bool,
    send_delay: Option<Duration>,
}

impl EncoderSession for RecordingSession {
    fn send_frames(&mut self, pixels: &[u8], repeat: u32) -> Result<(), EncoderError> {
        if let Some(delay) = self.send_delay {
            std::thread::sleep(delay);
        }
        if self.fail_send {
            return Err(EncoderError::Process("send refused by test backend".to_string()));
        }
        let mut log = self.log.lock().unwrap();
        log.repeats.push(repeat);
        log.frame_lens.push(pixels.len());
        Ok(())
    }

    fn close(&mut self) -> Result<(), EncoderError> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }

    fn clean(&mut self) {
        self.log.lock().unwrap().cleaned += 1;
    }
}
