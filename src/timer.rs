// The timer has a selectable frequency of 4096, 16384, 65536 or 262144
// Hertz, chosen by TAC. It increments the timer counter TIMA; on overflow
// TIMA reloads from the timer modulo TMA and a timer interrupt is requested.
// The divider DIV counts at a fixed 16384 Hz and resets on any write.
//
// See: http://gbdev.gg8.se/wiki/articles/Timer_and_Divider_Registers
use super::intf::{Flag, Intf};
use std::cell::RefCell;
use std::rc::Rc;

// Emits one tick every `period` input cycles, carrying the remainder.
struct Divider {
    period: u32,
    n: u32,
}

impl Divider {
    fn power_up(period: u32) -> Self {
        Self { period, n: 0x00 }
    }

    fn next(&mut self, cycles: u32) -> u32 {
        self.n += cycles;
        let rs = self.n / self.period;
        self.n %= self.period;
        rs
    }
}

pub struct Timer {
    intf: Rc<RefCell<Intf>>,
    // FF04 - DIV. Incremented at 16384Hz, so once every 256 cycles.
    div: u8,
    // FF05 - TIMA. Counts at the TAC rate while the timer is enabled.
    tima: u8,
    // FF06 - TMA. Loaded into TIMA on overflow.
    tima_modulo: u8,
    // FF07 - TAC. Bit 2 enables the timer, bits 1-0 select the rate:
    //   00: 4096 Hz   01: 262144 Hz   10: 65536 Hz   11: 16384 Hz
    tac: u8,
    div_clock: Divider,
    tima_clock: Divider,
}

impl Timer {
    pub fn power_up(intf: Rc<RefCell<Intf>>) -> Self {
        Self {
            intf,
            div: 0x00,
            tima: 0x00,
            tima_modulo: 0x00,
            tac: 0x00,
            div_clock: Divider::power_up(256),
            tima_clock: Divider::power_up(1024),
        }
    }

    pub fn get(&self, a: u16) -> u8 {
        match a {
            0xff04 => self.div,
            0xff05 => self.tima,
            0xff06 => self.tima_modulo,
            0xff07 => self.tac,
            _ => 0xff,
        }
    }

    pub fn set(&mut self, a: u16, v: u8) {
        match a {
            // Writing any value resets the divider.
            0xff04 => {
                self.div = 0x00;
                self.div_clock.n = 0x00;
            }
            0xff05 => self.tima = v,
            0xff06 => self.tima_modulo = v,
            0xff07 => {
                if self.tac & 0x03 != v & 0x03 {
                    self.tima_clock.n = 0x00;
                    self.tima_clock.period = match v & 0x03 {
                        0x00 => 1024,
                        0x01 => 16,
                        0x02 => 64,
                        _ => 256,
                    };
                }
                self.tac = v;
            }
            _ => {}
        }
    }

    pub fn next(&mut self, cycles: u32) {
        self.div = self.div.wrapping_add(self.div_clock.next(cycles) as u8);
        if self.tac & 0x04 != 0x00 {
            for _ in 0..self.tima_clock.next(cycles) {
                self.tima = self.tima.wrapping_add(1);
                if self.tima == 0x00 {
                    self.tima = self.tima_modulo;
                    self.intf.borrow_mut().hi(Flag::Timer);
                }
            }
        }
    }
}
