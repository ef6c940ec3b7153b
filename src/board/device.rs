// One physical peripheral (a motor output, a sensor) on a board

/// Longest device name; it has to fit the fixed-width status field
pub const MAX_NAME_LEN: usize = 9;

/// Wire value a board never sends as a real FPS; decodes to "no response yet"
pub const FPS_NO_RESPONSE: u16 = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    name: String,
    ordinal: usize,
    can_id_in: u16,
    can_id_out: u16,
    alive: bool,
    alive_once: bool,
    pub(crate) last_message_at_ms: Option<u64>,
    pub(crate) last_reading_at_ms: Option<u64>,
    pub(crate) fps_last: Option<u16>,
    pub(crate) firmware_version: Option<u16>,
}

impl Device {
    pub(crate) fn new(name: &str, ordinal: usize, can_id_in: u16, can_id_out: u16) -> Self {
        Self {
            name: name.to_string(),
            ordinal,
            can_id_in,
            can_id_out,
            alive: false,
            alive_once: false,
            last_message_at_ms: None,
            last_reading_at_ms: None,
            fps_last: None,
            firmware_version: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Id of frames sent by the host to this device
    pub fn can_id_in(&self) -> u16 {
        self.can_id_in
    }

    /// Id of frames this device sends to the host
    pub fn can_id_out(&self) -> u16 {
        self.can_id_out
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// True once the device has been seen alive, even if it died afterwards
    pub fn alive_once(&self) -> bool {
        self.alive_once
    }

    pub fn last_message_at_ms(&self) -> Option<u64> {
        self.last_message_at_ms
    }

    pub fn last_reading_at_ms(&self) -> Option<u64> {
        self.last_reading_at_ms
    }

    /// Last self-reported FPS, `None` until the device answers a request
    pub fn fps_last(&self) -> Option<u16> {
        self.fps_last
    }

    pub fn firmware_version(&self) -> Option<u16> {
        self.firmware_version
    }

    /// Is a frame with `frame_id` addressed to the host object for this device?
    pub fn is_addressed_to(&self, frame_id: u16) -> bool {
        frame_id == self.can_id_out
    }

    /// Does a frame with `frame_id` originate from the host object for this device?
    pub fn is_originated_by(&self, frame_id: u16) -> bool {
        frame_id == self.can_id_in
    }

    pub(crate) fn set_alive(&mut self, alive: bool) {
        self.alive = alive;
        if alive {
            self.alive_once = true;
        }
    }

    pub(crate) fn swap_ids(&mut self, other: &mut Device) {
        std::mem::swap(&mut self.can_id_in, &mut other.can_id_in);
        std::mem::swap(&mut self.can_id_out, &mut other.can_id_out);
    }

    pub(crate) fn set_fps(&mut self, raw: u16) {
        self.fps_last = if raw == FPS_NO_RESPONSE {
            None
        } else {
            Some(raw)
        };
    }
}
