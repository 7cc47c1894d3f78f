//! Dynamixel protocol 1.0 link for MX series servos
//!
//! All four finger servos hang off one half-duplex serial bus (a
//! USB2Dynamixel adapter on `/dev/ttyUSB0` by default). The bus is opened
//! once and shared by the per-servo [`ServoLink`]s behind a mutex; only the
//! control thread ever locks it.
//!
//! ```text
//! instruction: FF FF <id> <len> <instr> <params..> <checksum>
//! status:      FF FF <id> <len> <error> <params..> <checksum>
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rppal::uart::{Parity, Queue, Uart};
use tracing::{debug, info};

use super::{ActuatorLink, Load, LinkError, TorqueLimits};

const RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);
const HEADER: [u8; 2] = [0xFF, 0xFF];

// MX series control table
mod address {
    pub const MAX_TORQUE: u8 = 14;
    pub const GOAL_POSITION: u8 = 30;
    pub const MOVING_SPEED: u8 = 32;
    pub const TORQUE_LIMIT: u8 = 34;
    pub const PRESENT_POSITION: u8 = 36;
    pub const PRESENT_LOAD: u8 = 40;
    pub const PRESENT_TEMPERATURE: u8 = 43;
    pub const MOVING: u8 = 46;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// Inverted low byte of the sum over id, length, instruction/error and params
pub fn checksum(body: &[u8]) -> u8 {
    !body.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

pub fn instruction_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(params.len() + 6);
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push(params.len() as u8 + 2);
    packet.push(instruction as u8);
    packet.extend_from_slice(params);
    let sum = checksum(&packet[2..]);
    packet.push(sum);
    packet
}

/// Validate a complete status packet from servo `id` and return its
/// parameter bytes.
pub fn parse_status(id: u8, frame: &[u8]) -> Result<Vec<u8>, LinkError> {
    let malformed = |reason: String| LinkError::Malformed { id, reason };

    if frame.len() < 6 {
        return Err(malformed(format!("{} bytes is too short", frame.len())));
    }
    if frame[..2] != HEADER {
        return Err(malformed("missing FF FF header".to_string()));
    }
    if frame[2] != id {
        return Err(malformed(format!("answer came from servo {}", frame[2])));
    }
    if frame.len() != frame[3] as usize + 4 {
        return Err(malformed(format!(
            "length field {} does not match {} bytes",
            frame[3],
            frame.len()
        )));
    }

    let (body, sum) = frame[2..].split_at(frame.len() - 3);
    if checksum(body) != sum[0] {
        return Err(malformed(format!(
            "checksum {:#04x}, expected {:#04x}",
            sum[0],
            checksum(body)
        )));
    }

    let flags = frame[4];
    if flags != 0 {
        return Err(LinkError::Status { id, flags });
    }

    Ok(frame[5..frame.len() - 1].to_vec())
}

fn port_error(e: rppal::uart::Error) -> LinkError {
    LinkError::Port(e.to_string())
}

/// Serial bus carrying the servos
pub struct DynamixelBus {
    uart: Uart,
}

impl DynamixelBus {
    pub fn open(path: impl AsRef<Path>, baud_rate: u32) -> Result<Self, LinkError> {
        let path = path.as_ref();
        info!("Opening servo bus on {} at {} baud", path.display(), baud_rate);

        let mut uart =
            Uart::with_path(path, baud_rate, Parity::None, 8, 1).map_err(port_error)?;
        uart.set_read_mode(0, RESPONSE_TIMEOUT).map_err(port_error)?;
        uart.set_write_mode(true).map_err(port_error)?;

        Ok(Self { uart })
    }

    pub fn shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    pub fn ping(&mut self, id: u8) -> Result<(), LinkError> {
        self.transact(id, Instruction::Ping, &[]).map(|_| ())
    }

    pub fn read(&mut self, id: u8, address: u8, length: u8) -> Result<Vec<u8>, LinkError> {
        let params = self.transact(id, Instruction::Read, &[address, length])?;
        if params.len() != length as usize {
            return Err(LinkError::Malformed {
                id,
                reason: format!("asked for {} bytes, got {}", length, params.len()),
            });
        }
        Ok(params)
    }

    pub fn write(&mut self, id: u8, address: u8, data: &[u8]) -> Result<(), LinkError> {
        let mut params = Vec::with_capacity(data.len() + 1);
        params.push(address);
        params.extend_from_slice(data);
        self.transact(id, Instruction::Write, &params).map(|_| ())
    }

    fn transact(
        &mut self,
        id: u8,
        instruction: Instruction,
        params: &[u8],
    ) -> Result<Vec<u8>, LinkError> {
        let packet = instruction_packet(id, instruction, params);

        // Drop stale bytes from an earlier, abandoned answer
        self.uart.flush(Queue::Input).map_err(port_error)?;
        self.uart.write(&packet).map_err(port_error)?;
        debug!("Servo {} <- {:?} {:02X?}", id, instruction, packet);

        let mut head = [0u8; 4];
        self.read_exact(id, &mut head)?;
        let mut frame = head.to_vec();
        let mut rest = vec![0u8; head[3] as usize];
        self.read_exact(id, &mut rest)?;
        frame.extend_from_slice(&rest);
        debug!("Servo {} -> {:02X?}", id, frame);

        parse_status(id, &frame)
    }

    fn read_exact(&mut self, id: u8, buffer: &mut [u8]) -> Result<(), LinkError> {
        let mut filled = 0;
        while filled < buffer.len() {
            let count = self.uart.read(&mut buffer[filled..]).map_err(port_error)?;
            if count == 0 {
                return Err(LinkError::NoResponse {
                    id,
                    reason: format!("timed out after {} of {} bytes", filled, buffer.len()),
                });
            }
            filled += count;
        }
        Ok(())
    }
}

/// One servo on a shared [`DynamixelBus`]
#[derive(Clone)]
pub struct ServoLink {
    id: u8,
    bus: Arc<Mutex<DynamixelBus>>,
}

impl ServoLink {
    /// Ping servo `id` and hand out a link to it.
    pub fn connect(bus: Arc<Mutex<DynamixelBus>>, id: u8) -> Result<Self, LinkError> {
        let link = Self { id, bus };
        link.with_bus(|bus| bus.ping(id))?;
        info!("Servo {} answered ping", id);
        Ok(link)
    }

    fn with_bus<T>(
        &self,
        operation: impl FnOnce(&mut DynamixelBus) -> Result<T, LinkError>,
    ) -> Result<T, LinkError> {
        let mut bus = self.bus.lock().map_err(|_| LinkError::BusPoisoned)?;
        operation(&mut bus)
    }

    fn read_byte(&self, address: u8) -> Result<u8, LinkError> {
        let bytes = self.with_bus(|bus| bus.read(self.id, address, 1))?;
        Ok(bytes[0])
    }

    fn read_word(&self, address: u8) -> Result<u16, LinkError> {
        let bytes = self.with_bus(|bus| bus.read(self.id, address, 2))?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn write_word(&self, address: u8, value: u16) -> Result<(), LinkError> {
        self.with_bus(|bus| bus.write(self.id, address, &value.to_le_bytes()))
    }
}

impl ActuatorLink for ServoLink {
    fn id(&self) -> u8 {
        self.id
    }

    // Multi-turn mode reports signed 16 bit positions
    fn read_position(&mut self) -> Result<i32, LinkError> {
        Ok(self.read_word(address::PRESENT_POSITION)? as i16 as i32)
    }

    fn read_goal_position(&mut self) -> Result<i32, LinkError> {
        Ok(self.read_word(address::GOAL_POSITION)? as i16 as i32)
    }

    fn is_moving(&mut self) -> Result<bool, LinkError> {
        Ok(self.read_byte(address::MOVING)? != 0)
    }

    fn set_goal_position(&mut self, ticks: i32) -> Result<(), LinkError> {
        let raw = i16::try_from(ticks).map_err(|_| LinkError::OutOfRange { id: self.id, ticks })?;
        self.write_word(address::GOAL_POSITION, raw as u16)
    }

    fn read_temperature(&mut self) -> Result<u8, LinkError> {
        self.read_byte(address::PRESENT_TEMPERATURE)
    }

    fn read_torque_limits(&mut self) -> Result<TorqueLimits, LinkError> {
        Ok(TorqueLimits {
            max: self.read_word(address::MAX_TORQUE)?,
            allowed: self.read_word(address::TORQUE_LIMIT)?,
        })
    }

    fn read_load(&mut self) -> Result<Load, LinkError> {
        Ok(Load::from_raw(self.read_word(address::PRESENT_LOAD)?))
    }

    fn set_speed(&mut self, speed: u16) -> Result<(), LinkError> {
        self.write_word(address::MOVING_SPEED, speed)
    }
}
