// Every machine in the Game Boy family exits its boot rom with a slightly
// different register file, which games use to detect the hardware they run
// on. The color models additionally unlock banked WRAM/VRAM and the palette
// memory, but only when the cartridge opts in via its header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Model {
    // Original Game Boy (dot matrix game)
    Dmg,
    // Game Boy Pocket / Game Boy Light
    Mgb,
    // Super Game Boy
    Sgb,
    // Super Game Boy 2
    Sgb2,
    // Game Boy Color
    Gbc,
    // Game Boy Advance running in compatibility mode
    Gba,
    // Game Boy Advance SP running in compatibility mode
    GbaSp,
}

impl Model {
    // Whether the machine carries the color hardware at all. The features
    // only activate for cartridges with the GBC flag set.
    pub fn is_color(self) -> bool {
        match self {
            Model::Gbc | Model::Gba | Model::GbaSp => true,
            _ => false,
        }
    }
}
