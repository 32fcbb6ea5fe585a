// Note: Game BoyTM, Game Boy PocketTM, Super Game BoyTM and Game Boy ColorTM
// are registered trademarks of Nintendo CO., LTD. © 1989 to 1999 by Nintendo
// CO., LTD.
use dotmatrix::cartridge::Cartridge;
use dotmatrix::model::Model;
use dotmatrix::motherboard::Motherboard;

fn parse_model(name: &str) -> Option<Model> {
    match name {
        "" => None,
        "dmg" => Some(Model::Dmg),
        "mgb" => Some(Model::Mgb),
        "sgb" => Some(Model::Sgb),
        "sgb2" => Some(Model::Sgb2),
        "gbc" => Some(Model::Gbc),
        "gba" => Some(Model::Gba),
        "gbasp" => Some(Model::GbaSp),
        _ => {
            rog::println!("Unknown model {}, expected dmg|mgb|sgb|sgb2|gbc|gba|gbasp", name);
            std::process::exit(1);
        }
    }
}

fn power_up(rom: &str, model: &str) -> Motherboard {
    let bytes = match std::fs::read(rom) {
        Ok(bytes) => bytes,
        Err(err) => {
            rog::println!("{}: {}", rom, err);
            std::process::exit(1);
        }
    };
    let sav_path = std::path::PathBuf::from(rom).with_extension("sav");
    let cartridge = match Cartridge::power_up(bytes, Some(sav_path)) {
        Ok(cartridge) => cartridge,
        Err(err) => {
            rog::println!("{}", err);
            std::process::exit(1);
        }
    };
    match parse_model(model) {
        Some(model) => Motherboard::power_up_with_model(model, cartridge),
        None => Motherboard::power_up(cartridge),
    }
}

#[cfg(feature = "gui")]
fn main() {
    use dotmatrix::joypad::JoypadKey;
    use dotmatrix::ppu::{SCREEN_H, SCREEN_W};
    use std::time::{Duration, Instant};

    rog::reg("dotmatrix");
    rog::reg("dotmatrix::cartridge");

    let mut rom = String::new();
    let mut c_scale = 2;
    let mut c_model = String::new();
    {
        let mut ap = argparse::ArgumentParser::new();
        ap.set_description("Game Boy emulator");
        ap.refer(&mut c_scale).add_option(
            &["-x", "--scale-factor"],
            argparse::Store,
            "Scale the video by a factor of 1, 2, 4, or 8",
        );
        ap.refer(&mut c_model).add_option(
            &["-m", "--model"],
            argparse::Store,
            "Console model: dmg, mgb, sgb, sgb2, gbc, gba or gbasp",
        );
        ap.refer(&mut rom).add_argument("rom", argparse::Store, "Rom name");
        ap.parse_args_or_exit();
    }

    let mut mbrd = power_up(&rom, &c_model);

    let mut option = minifb::WindowOptions::default();
    option.resize = true;
    option.scale = match c_scale {
        1 => minifb::Scale::X1,
        2 => minifb::Scale::X2,
        4 => minifb::Scale::X4,
        8 => minifb::Scale::X8,
        _ => {
            rog::println!("Supported scale: 1, 2, 4 or 8");
            std::process::exit(1);
        }
    };
    let rom_name = mbrd.mmu.cartridge.title();
    let mut window =
        minifb::Window::new(format!("Game Boy - {}", rom_name).as_str(), SCREEN_W, SCREEN_H, option).unwrap();
    let mut window_buffer = vec![0x00u32; SCREEN_W * SCREEN_H];
    window.update_with_buffer(window_buffer.as_slice()).unwrap();

    // One frame is 70224 t-states at 4.194304 MHz.
    let frame_len = Duration::from_nanos(16_742_706);
    let mut tick = Instant::now();
    loop {
        // Stop when the user closes the window.
        if !window.is_open() || window.is_key_down(minifb::Key::Escape) {
            break;
        }

        // Execute an instruction.
        if let Err(err) = mbrd.next() {
            rog::println!("{}", err);
            break;
        }

        // Present the vsync buffer, expanding RGB555 to the window's
        // 8-bit channels.
        if mbrd.check_and_reset_frame_updated() {
            for (i, &w) in mbrd.mmu.ppu.vsync.iter().enumerate() {
                let r = u32::from(w & 0x001f) << 3;
                let g = u32::from((w >> 5) & 0x001f) << 3;
                let b = u32::from((w >> 10) & 0x001f) << 3;
                window_buffer[i] = 0xff00_0000 | (r << 16) | (g << 8) | b;
            }
            window.update_with_buffer(window_buffer.as_slice()).unwrap();
        }

        if !mbrd.frame_elapsed() {
            continue;
        }

        // Handle keyboard events once per frame.
        let keys = [
            (minifb::Key::Right, JoypadKey::Right),
            (minifb::Key::Up, JoypadKey::Up),
            (minifb::Key::Left, JoypadKey::Left),
            (minifb::Key::Down, JoypadKey::Down),
            (minifb::Key::Z, JoypadKey::A),
            (minifb::Key::X, JoypadKey::B),
            (minifb::Key::Space, JoypadKey::Select),
            (minifb::Key::Enter, JoypadKey::Start),
        ];
        for (rk, vk) in keys.iter() {
            if window.is_key_down(*rk) {
                mbrd.mmu.joypad.keydown(*vk);
            } else {
                mbrd.mmu.joypad.keyup(*vk);
            }
        }

        // Sleep away whatever is left of the 16.74ms tick.
        let now = Instant::now();
        let elapsed = now - tick;
        if elapsed < frame_len {
            std::thread::sleep(frame_len - elapsed);
        }
        tick = Instant::now();
    }
    mbrd.mmu.cartridge.sav();
}

// Headless runner: full speed, no window, serial output on stdout. Handy
// for the blargg test roms.
#[cfg(not(feature = "gui"))]
fn main() {
    rog::reg("dotmatrix");
    rog::reg("dotmatrix::cartridge");

    let mut rom = String::new();
    let mut c_model = String::new();
    {
        let mut ap = argparse::ArgumentParser::new();
        ap.set_description("Game Boy emulator (headless)");
        ap.refer(&mut c_model).add_option(
            &["-m", "--model"],
            argparse::Store,
            "Console model: dmg, mgb, sgb, sgb2, gbc, gba or gbasp",
        );
        ap.refer(&mut rom).add_argument("rom", argparse::Store, "Rom name");
        ap.parse_args_or_exit();
    }

    let mut mbrd = power_up(&rom, &c_model);
    loop {
        if let Err(err) = mbrd.next() {
            rog::println!("{}", err);
            break;
        }
    }
    mbrd.mmu.cartridge.sav();
}
