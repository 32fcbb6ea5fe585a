// The memory management unit. Every CPU access passes through here, gets
// decoded by address range and is dispatched to the cartridge, the pixel
// pipeline, a peripheral register or one of the internal rams. The unit
// also owns the machine-wide mutable state: the work ram banks, the
// interrupt enable and flag bytes, and the color-mode switches.
use super::bus::Bus;
use super::cartridge::Cartridge;
use super::intf::Intf;
use super::joypad::Joypad;
use super::model::Model;
use super::ppu::Ppu;
use super::serial::Serial;
use super::timer::Timer;
use std::cell::RefCell;
use std::rc::Rc;

pub struct Mmu {
    pub cartridge: Cartridge,
    pub ppu: Ppu,
    pub joypad: Joypad,
    pub serial: Serial,
    pub timer: Timer,
    intf: Rc<RefCell<Intf>>,
    // FFFF - IE, the interrupt enable mask.
    inte: u8,
    hram: [u8; 0x7f],
    // Eight 4 KiB work ram banks. Bank 0 is fixed at C000; the D000 window
    // is switchable on color machines and pinned to bank 1 otherwise.
    wram: [u8; 0x8000],
    wram_bank: usize,
    color: bool,
}

impl Mmu {
    pub fn power_up(model: Model, cartridge: Cartridge) -> Self {
        let color = model.is_color() && cartridge.gbc_flag();
        let intf = Rc::new(RefCell::new(Intf::power_up()));
        let mut r = Self {
            cartridge,
            ppu: Ppu::power_up(color, intf.clone()),
            joypad: Joypad::power_up(intf.clone()),
            serial: Serial::power_up(intf.clone()),
            timer: Timer::power_up(intf.clone()),
            intf,
            inte: 0x00,
            hram: [0x00; 0x7f],
            wram: [0x00; 0x8000],
            wram_bank: 0x01,
            color,
        };
        // The io file as the boot rom leaves it.
        r.write8(0xff05, 0x00);
        r.write8(0xff06, 0x00);
        r.write8(0xff07, 0x00);
        r.write8(0xff40, 0x91);
        r.write8(0xff42, 0x00);
        r.write8(0xff43, 0x00);
        r.write8(0xff45, 0x00);
        r.write8(0xff47, 0xfc);
        r.write8(0xff48, 0xff);
        r.write8(0xff49, 0xff);
        r.write8(0xff4a, 0x00);
        r.write8(0xff4b, 0x00);
        r
    }

    // Pumps the peripherals with the t-states one instruction consumed.
    pub fn next(&mut self, cycles: u32) {
        self.timer.next(cycles);
        self.ppu.next(cycles);
    }

    // Side doors for the pixel pipeline's host: never mode-gated.
    pub fn vram_read(&self, offset: u16) -> u8 {
        self.ppu.vram_read(offset)
    }

    pub fn oam_read(&self, offset: u16) -> u8 {
        self.ppu.oam_read(offset)
    }

    // FF46 - DMA. Copies A0h bytes from v << 8 into oam in one go, skipping
    // the mode gate the way the hardware's dedicated bus does.
    fn run_oam_dma(&mut self, v: u8) {
        let base = u16::from(v) << 8;
        for i in 0..0xa0 {
            let b = self.read8(base + i);
            self.ppu.oam_write(i, b);
        }
    }
}

impl Bus for Mmu {
    fn read8(&self, a: u16) -> u8 {
        match a {
            0x0000..=0x7fff => self.cartridge.read_rom(a),
            0x8000..=0x9fff => self.ppu.get(a),
            0xa000..=0xbfff => self.cartridge.read_ram(a - 0xa000),
            0xc000..=0xcfff => self.wram[a as usize - 0xc000],
            0xd000..=0xdfff => self.wram[a as usize - 0xd000 + 0x1000 * self.wram_bank],
            // E000-FDFF mirrors C000-DDFF.
            0xe000..=0xefff => self.wram[a as usize - 0xe000],
            0xf000..=0xfdff => self.wram[a as usize - 0xf000 + 0x1000 * self.wram_bank],
            0xfe00..=0xfe9f => self.ppu.get(a),
            0xfea0..=0xfeff => 0x00,
            0xff00 => self.joypad.get(),
            0xff01..=0xff02 => self.serial.get(a),
            0xff04..=0xff07 => self.timer.get(a),
            0xff0f => self.intf.borrow().data,
            0xff40..=0xff45 | 0xff47..=0xff4b => self.ppu.get(a),
            0xff4f => {
                if self.color {
                    self.ppu.get(a)
                } else {
                    0xff
                }
            }
            0xff68..=0xff6b => {
                if self.color {
                    self.ppu.get(a)
                } else {
                    0xff
                }
            }
            0xff70 => {
                if self.color {
                    0xf8 | self.wram_bank as u8
                } else {
                    0xff
                }
            }
            0xff80..=0xfffe => self.hram[a as usize - 0xff80],
            0xffff => self.inte,
            _ => 0xff,
        }
    }

    fn write8(&mut self, a: u16, v: u8) {
        match a {
            0x0000..=0x7fff => self.cartridge.write_rom(a, v),
            0x8000..=0x9fff => self.ppu.set(a, v),
            0xa000..=0xbfff => self.cartridge.write_ram(a - 0xa000, v),
            0xc000..=0xcfff => self.wram[a as usize - 0xc000] = v,
            0xd000..=0xdfff => self.wram[a as usize - 0xd000 + 0x1000 * self.wram_bank] = v,
            0xe000..=0xefff => self.wram[a as usize - 0xe000] = v,
            0xf000..=0xfdff => self.wram[a as usize - 0xf000 + 0x1000 * self.wram_bank] = v,
            0xfe00..=0xfe9f => self.ppu.set(a, v),
            0xfea0..=0xfeff => {}
            0xff00 => self.joypad.set(v),
            0xff01..=0xff02 => self.serial.set(a, v),
            0xff04..=0xff07 => self.timer.set(a, v),
            0xff0f => self.intf.borrow_mut().data = v,
            0xff46 => self.run_oam_dma(v),
            0xff40..=0xff45 | 0xff47..=0xff4b => self.ppu.set(a, v),
            0xff4f => {
                if self.color {
                    self.ppu.set(a, v);
                }
            }
            0xff68..=0xff6b => {
                if self.color {
                    self.ppu.set(a, v);
                }
            }
            0xff70 => {
                if self.color {
                    self.wram_bank = match v & 0x07 {
                        0x00 => 0x01,
                        n => n as usize,
                    };
                }
            }
            0xff80..=0xfffe => self.hram[a as usize - 0xff80] = v,
            0xffff => self.inte = v,
            _ => {}
        }
    }
}
