// Serial link cable. One side acts as master and supplies the clock; with
// nothing on the other end of the wire a transfer still completes, shifting
// in all ones. That is enough for the blargg test roms, which print their
// verdict one byte at a time through here, so outgoing bytes are echoed to
// stdout and kept for inspection.
//
// See: http://gbdev.gg8.se/wiki/articles/Serial_Data_Transfer_(Link_Cable)
use super::intf::{Flag, Intf};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

pub struct Serial {
    intf: Rc<RefCell<Intf>>,
    // FF01 - SB. The next byte to go out, and after a transfer the byte
    // that came in.
    data: u8,
    // FF02 - SC. Bit 7 requests a transfer, bit 0 selects the internal
    // clock. Transfers only start on the side with the internal clock.
    control: u8,
    output: Vec<u8>,
}

impl Serial {
    pub fn power_up(intf: Rc<RefCell<Intf>>) -> Self {
        Self { intf, data: 0x00, control: 0x00, output: Vec::new() }
    }

    pub fn get(&self, a: u16) -> u8 {
        match a {
            0xff01 => self.data,
            0xff02 => self.control,
            _ => 0xff,
        }
    }

    pub fn set(&mut self, a: u16, v: u8) {
        match a {
            0xff01 => self.data = v,
            0xff02 => {
                self.control = v;
                if v & 0x81 == 0x81 {
                    self.output.push(self.data);
                    let _ = std::io::stdout().write_all(&[self.data]);
                    let _ = std::io::stdout().flush();
                    // Nobody on the wire: all ones shift in, the transfer
                    // flag drops and the interrupt fires.
                    self.data = 0xff;
                    self.control &= 0x7f;
                    self.intf.borrow_mut().hi(Flag::Serial);
                }
            }
            _ => {}
        }
    }

    // Everything the game has sent so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }
}
