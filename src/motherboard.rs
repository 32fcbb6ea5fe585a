// The machine aggregate. Owns the CPU and the bus (which in turn owns the
// cartridge and every peripheral) and runs the lockstep pump: one
// instruction, then the elapsed t-states go to the pixel pipeline and the
// timer. Frames fall out of the cycle counter: one every 70224 t-states.
use super::bus::Bus;
use super::cartridge::Cartridge;
use super::cpu::Cpu;
use super::error::Result;
use super::mmu::Mmu;
use super::model::Model;
use super::ppu::CYCLES_PER_FRAME;

pub struct Motherboard {
    pub mmu: Mmu,
    pub cpu: Cpu,
    frame: u64,
}

impl Motherboard {
    // Builds the machine the cartridge asks for: color if the header
    // carries the color flag, super if it asks for super functions,
    // otherwise the original brick.
    pub fn power_up(cartridge: Cartridge) -> Self {
        let model = if cartridge.gbc_flag() {
            Model::Gbc
        } else if cartridge.sgb_flag() {
            Model::Sgb
        } else {
            Model::Dmg
        };
        Self::power_up_with_model(model, cartridge)
    }

    pub fn power_up_with_model(model: Model, cartridge: Cartridge) -> Self {
        let color_cart = model.is_color() && cartridge.gbc_flag();
        Self {
            cpu: Cpu::power_up(model, color_cart),
            mmu: Mmu::power_up(model, cartridge),
            frame: 0,
        }
    }

    // One instruction through the whole machine.
    pub fn next(&mut self) -> Result<u32> {
        let cycles = self.cpu.next(&mut self.mmu)?;
        self.mmu.next(cycles);
        Ok(cycles)
    }

    // True once per crossing of a frame boundary on the cycle counter.
    // The host uses this to pace itself and to poll for input.
    pub fn frame_elapsed(&mut self) -> bool {
        let frame = self.cpu.cycle / u64::from(CYCLES_PER_FRAME);
        if frame != self.frame {
            self.frame = frame;
            true
        } else {
            false
        }
    }

    // Whether the pixel pipeline published a fresh frame since last asked.
    pub fn check_and_reset_frame_updated(&mut self) -> bool {
        let updated = self.mmu.ppu.updated;
        self.mmu.ppu.updated = false;
        updated
    }

    pub fn read8(&self, a: u16) -> u8 {
        self.mmu.read8(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::test_rom;
    use crate::ppu::PpuMode;

    fn machine() -> Motherboard {
        let mut rom = test_rom(0x00, 0x00, 0x00);
        // An infinite loop at the entry point: jr -2.
        rom[0x0100] = 0x18;
        rom[0x0101] = 0xfe;
        let cart = Cartridge::power_up(rom, None).unwrap();
        Motherboard::power_up_with_model(Model::Dmg, cart)
    }

    #[test]
    fn boot_exit_register_state() {
        let m = machine();
        assert_eq!(m.cpu.reg.get_af(), 0x01b0);
        assert_eq!(m.cpu.reg.get_bc(), 0x0013);
        assert_eq!(m.cpu.reg.get_de(), 0x00d8);
        assert_eq!(m.cpu.reg.get_hl(), 0x014d);
        assert_eq!(m.cpu.reg.sp, 0xfffe);
        assert_eq!(m.cpu.reg.pc, 0x0100);
    }

    #[test]
    fn ppu_tracks_cpu_cycles() {
        let mut m = machine();
        // One jr -2 is 12 t-states; run a whole scanline's worth.
        for _ in 0..38 {
            m.next().unwrap();
        }
        assert_eq!(m.cpu.cycle, 456);
        assert_eq!(m.mmu.ppu.line(), 1);
        assert_eq!(m.mmu.ppu.mode(), PpuMode::OamScan);
    }

    #[test]
    fn frame_flip_after_70224_cycles() {
        let mut m = machine();
        let mut flips = 0;
        while m.cpu.cycle < u64::from(CYCLES_PER_FRAME) * 3 {
            m.next().unwrap();
            if m.frame_elapsed() {
                flips += 1;
            }
        }
        assert_eq!(flips, 3);
        assert!(m.check_and_reset_frame_updated());
        assert!(!m.check_and_reset_frame_updated());
    }

    #[test]
    fn vblank_interrupt_requested() {
        let mut m = machine();
        while m.cpu.cycle < u64::from(CYCLES_PER_FRAME) {
            m.next().unwrap();
        }
        assert_eq!(m.read8(0xff0f) & 0x01, 0x01);
    }
}
