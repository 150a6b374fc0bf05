//! DS1620 three-wire digital thermometer: a reset/clock/data bit-banged
//! state machine. Commands are 8 bits, LSB first; responses are 9 bits for
//! temperature/threshold reads, 8 bits for configuration.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    CmdIn,
    DataIn { command: u8, bits_received: u8, value: u16 },
    DataOut { bits_sent: u8, shift: u16, width: u8 },
}

const CMD_READ_TEMP: u8 = 0xAA;
const CMD_READ_COUNTER: u8 = 0xA0;
const CMD_READ_SLOPE: u8 = 0xA9;
const CMD_WRITE_TH: u8 = 0x01;
const CMD_WRITE_TL: u8 = 0x02;
const CMD_READ_TH: u8 = 0xA1;
const CMD_READ_TL: u8 = 0xA2;
const CMD_START_CONVERT: u8 = 0xEE;
const CMD_STOP_CONVERT: u8 = 0x22;
const CMD_WRITE_CONFIG: u8 = 0x0C;
const CMD_READ_CONFIG: u8 = 0xAC;

pub struct Ds1620 {
    state: State,
    cmd_bits_received: u8,
    cmd_shift: u8,

    /// Stored as `temperature_half_degrees << 1`, matching the hardware's
    /// public setter contract.
    temperature: i16,
    threshold_high: i16,
    threshold_low: i16,
    config: u8,
    th_flag: bool,
    tl_flag: bool,
}

const CONFIG_THF: u8 = 0x40;
const CONFIG_TLF: u8 = 0x20;

impl Default for Ds1620 {
    fn default() -> Self {
        Self {
            state: State::CmdIn,
            cmd_bits_received: 0,
            cmd_shift: 0,
            temperature: 0,
            threshold_high: 0,
            threshold_low: 0,
            config: 0,
            th_flag: false,
            tl_flag: false,
        }
    }
}

impl Ds1620 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset falling edge: re-enter `CMD_IN` with a cleared shift register.
    pub fn reset(&mut self) {
        self.state = State::CmdIn;
        self.cmd_bits_received = 0;
        self.cmd_shift = 0;
    }

    /// Sets the current temperature reading (already `<<1`-encoded) and
    /// latches the threshold-exceeded status flags.
    pub fn set_temperature(&mut self, temp_half_degrees: i16) {
        self.temperature = temp_half_degrees << 1;
        self.th_flag = self.temperature >= self.threshold_high;
        self.tl_flag = self.temperature <= self.threshold_low;
        self.config = (self.config & !(CONFIG_THF | CONFIG_TLF))
            | if self.th_flag { CONFIG_THF } else { 0 }
            | if self.tl_flag { CONFIG_TLF } else { 0 };
    }

    /// Clocks one data bit out of the host into the chip. Ignored while the
    /// chip is in `DATA_OUT` state (reads and writes never interleave).
    pub fn clock_data_in(&mut self, bit: bool) {
        match &mut self.state {
            State::CmdIn => {
                self.cmd_shift |= (bit as u8) << self.cmd_bits_received;
                self.cmd_bits_received += 1;
                if self.cmd_bits_received == 8 {
                    self.dispatch_command(self.cmd_shift);
                }
            }
            State::DataIn {
                bits_received,
                value,
                ..
            } => {
                *value |= (bit as u16) << *bits_received;
                *bits_received += 1;
                if *bits_received == 9 {
                    self.complete_data_in();
                }
            }
            State::DataOut { .. } => {}
        }
    }

    /// Clocks one data bit out of the chip. Returns `None` outside
    /// `DATA_OUT` state.
    pub fn clock_data_out(&mut self) -> Option<bool> {
        match &mut self.state {
            State::DataOut {
                bits_sent,
                shift,
                width,
            } => {
                let bit = (*shift & 1) != 0;
                *shift >>= 1;
                *bits_sent += 1;
                if *bits_sent == *width {
                    self.state = State::CmdIn;
                    self.cmd_bits_received = 0;
                    self.cmd_shift = 0;
                }
                Some(bit)
            }
            _ => None,
        }
    }

    fn dispatch_command(&mut self, command: u8) {
        match command {
            CMD_READ_TEMP => self.start_output(self.temperature as u16 & 0x1FF, 9),
            CMD_READ_COUNTER | CMD_READ_SLOPE => self.start_output(0, 9),
            CMD_READ_TH => self.start_output(self.threshold_high as u16 & 0x1FF, 9),
            CMD_READ_TL => self.start_output(self.threshold_low as u16 & 0x1FF, 9),
            CMD_READ_CONFIG => self.start_output(self.config as u16, 8),
            CMD_WRITE_TH | CMD_WRITE_TL | CMD_WRITE_CONFIG => {
                self.state = State::DataIn {
                    command,
                    bits_received: 0,
                    value: 0,
                };
            }
            CMD_START_CONVERT | CMD_STOP_CONVERT => {
                self.state = State::CmdIn;
                self.cmd_bits_received = 0;
                self.cmd_shift = 0;
            }
            _ => {
                tracing::trace!(command, "ds1620: unknown command, ignoring");
                self.state = State::CmdIn;
                self.cmd_bits_received = 0;
                self.cmd_shift = 0;
            }
        }
    }

    fn start_output(&mut self, value: u16, width: u8) {
        self.state = State::DataOut {
            bits_sent: 0,
            shift: value,
            width,
        };
    }

    fn complete_data_in(&mut self) {
        if let State::DataIn { command, value, .. } = self.state {
            match command {
                CMD_WRITE_TH => self.threshold_high = (value & 0x1FF) as i16,
                CMD_WRITE_TL => self.threshold_low = (value & 0x1FF) as i16,
                CMD_WRITE_CONFIG => self.config = (value & 0xFF) as u8,
                _ => {}
            }
        }
        self.state = State::CmdIn;
        self.cmd_bits_received = 0;
        self.cmd_shift = 0;
    }
}
