use std::os::fd::AsFd;

use rustix::termios::{
    self, ControlModes, InputModes, LocalModes, OptionalActions, OutputModes, SpecialCodeIndex as Sc, Termios, Winsize
};
use tracing::{debug, warn};

use crate::{SshCoreError, SshResult, wire};

/// A single terminal attribute addressed by an SSH mode opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attr {
    Code(Sc),
    Input(InputModes),
    Local(LocalModes),
    Output(OutputModes),
    Control(ControlModes),
    CharSize(ControlModes),
    InputSpeed,
    OutputSpeed,
}

fn attr_for_opcode(opcode: u8) -> Option<Attr> {
    use Attr::*;
    let attr = match opcode {
        1 => Code(Sc::VINTR),
        2 => Code(Sc::VQUIT),
        3 => Code(Sc::VERASE),
        4 => Code(Sc::VKILL),
        5 => Code(Sc::VEOF),
        6 => Code(Sc::VEOL),
        7 => Code(Sc::VEOL2),
        8 => Code(Sc::VSTART),
        9 => Code(Sc::VSTOP),
        10 => Code(Sc::VSUSP),
        12 => Code(Sc::VREPRINT),
        13 => Code(Sc::VWERASE),
        14 => Code(Sc::VLNEXT),
        18 => Code(Sc::VDISCARD),
        30 => Input(InputModes::IGNPAR),
        31 => Input(InputModes::PARMRK),
        32 => Input(InputModes::INPCK),
        33 => Input(InputModes::ISTRIP),
        34 => Input(InputModes::INLCR),
        35 => Input(InputModes::IGNCR),
        36 => Input(InputModes::ICRNL),
        38 => Input(InputModes::IXON),
        39 => Input(InputModes::IXANY),
        40 => Input(InputModes::IXOFF),
        41 => Input(InputModes::IMAXBEL),
        50 => Local(LocalModes::ISIG),
        51 => Local(LocalModes::ICANON),
        53 => Local(LocalModes::ECHO),
        54 => Local(LocalModes::ECHOE),
        55 => Local(LocalModes::ECHOK),
        56 => Local(LocalModes::ECHONL),
        57 => Local(LocalModes::NOFLSH),
        58 => Local(LocalModes::TOSTOP),
        59 => Local(LocalModes::IEXTEN),
        60 => Local(LocalModes::ECHOCTL),
        61 => Local(LocalModes::ECHOKE),
        62 => Local(LocalModes::PENDIN),
        70 => Output(OutputModes::OPOST),
        72 => Output(OutputModes::ONLCR),
        73 => Output(OutputModes::OCRNL),
        74 => Output(OutputModes::ONOCR),
        75 => Output(OutputModes::ONLRET),
        90 => CharSize(ControlModes::CS7),
        91 => CharSize(ControlModes::CS8),
        92 => Control(ControlModes::PARENB),
        93 => Control(ControlModes::PARODD),
        128 => InputSpeed,
        129 => OutputSpeed,
        _ => return None,
    };
    Some(attr)
}

/// Whether the opcode maps to an attribute this host knows how to set.
pub fn is_supported_opcode(opcode: u8) -> bool {
    attr_for_opcode(opcode).is_some()
}

fn apply_attr(term: &mut Termios, attr: Attr, value: u32) -> std::io::Result<()> {
    let enabled = value != 0;
    match attr {
        Attr::Code(index) => term.special_codes[index] = value as u8,
        Attr::Input(flag) => term.input_modes.set(flag, enabled),
        Attr::Local(flag) => term.local_modes.set(flag, enabled),
        Attr::Output(flag) => term.output_modes.set(flag, enabled),
        Attr::Control(flag) => term.control_modes.set(flag, enabled),
        Attr::CharSize(size) => {
            if enabled {
                term.control_modes.remove(ControlModes::CSIZE);
                term.control_modes.insert(size);
            }
        }
        Attr::InputSpeed => term.set_input_speed(value)?,
        Attr::OutputSpeed => term.set_output_speed(value)?,
    }
    Ok(())
}

/// Apply an encoded pty mode list to the terminal behind `fd`.
///
/// Each recognised opcode is applied on its own read-modify-write cycle.
/// Unknown opcodes and failed updates are logged and skipped. Returns the
/// number of attributes that were applied.
pub fn apply_modelist<Fd: AsFd>(fd: Fd, modelist: &[u8]) -> usize {
    let mut applied = 0;
    for (opcode, value) in wire::decode_modelist(modelist) {
        let Some(attr) = attr_for_opcode(opcode) else {
            debug!(opcode, value, "unknown terminal mode opcode");
            continue;
        };
        match set_single(fd.as_fd(), attr, value) {
            Ok(()) => applied += 1,
            Err(err) => warn!(opcode, value, error = %err, "failed to set terminal attribute"),
        }
    }
    applied
}

fn set_single<Fd: AsFd>(fd: Fd, attr: Attr, value: u32) -> SshResult<()> {
    let mut term = termios::tcgetattr(fd.as_fd()).map_err(|e| SshCoreError::terminal("tcgetattr", e))?;
    apply_attr(&mut term, attr, value).map_err(|e| SshCoreError::terminal("set attribute", e))?;
    termios::tcsetattr(fd.as_fd(), OptionalActions::Now, &term).map_err(|e| SshCoreError::terminal("tcsetattr", e))?;
    Ok(())
}

/// Resize the terminal behind `fd`.
pub fn set_window_size<Fd: AsFd>(fd: Fd, columns: u32, rows: u32, width_px: u32, height_px: u32) -> SshResult<()> {
    let size = Winsize {
        ws_row: clamp_u16(rows),
        ws_col: clamp_u16(columns),
        ws_xpixel: clamp_u16(width_px),
        ws_ypixel: clamp_u16(height_px),
    };
    termios::tcsetwinsize(fd, size).map_err(|e| SshCoreError::terminal("tcsetwinsize", e))
}

/// Read back the window size as `(columns, rows)`.
pub fn window_size<Fd: AsFd>(fd: Fd) -> SshResult<(u16, u16)> {
    let size = termios::tcgetwinsize(fd).map_err(|e| SshCoreError::terminal("tcgetwinsize", e))?;
    Ok((size.ws_col, size.ws_row))
}

fn clamp_u16(value: u32) -> u16 {
    value.min(u16::MAX as u32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_termios() -> Termios {
        let (master, _slave) = open_pair();
        termios::tcgetattr(&master).expect("tcgetattr")
    }

    fn open_pair() -> (std::os::fd::OwnedFd, std::os::fd::OwnedFd) {
        let pty = nix::pty::openpty(None, None).expect("openpty");
        (pty.master, pty.slave)
    }

    #[test]
    fn flags_follow_value() {
        let mut term = sample_termios();
        apply_attr(&mut term, Attr::Local(LocalModes::ECHO), 0).unwrap();
        assert!(!term.local_modes.contains(LocalModes::ECHO));
        apply_attr(&mut term, Attr::Local(LocalModes::ECHO), 1).unwrap();
        assert!(term.local_modes.contains(LocalModes::ECHO));
    }

    #[test]
    fn char_size_replaces_mask() {
        let mut term = sample_termios();
        apply_attr(&mut term, Attr::CharSize(ControlModes::CS7), 1).unwrap();
        assert_eq!(term.control_modes & ControlModes::CSIZE, ControlModes::CS7);
    }

    #[test]
    fn unknown_opcodes_are_skipped() {
        assert!(!is_supported_opcode(11));
        assert!(!is_supported_opcode(200));
        assert!(is_supported_opcode(53));
    }

    #[test]
    fn modelist_is_applied_to_slave() {
        let (_master, slave) = open_pair();
        // VINTR=3, ECHO=0, terminator, then an opcode that must be ignored.
        let modelist = [1, 0, 0, 0, 3, 53, 0, 0, 0, 0, 0, 53, 0, 0, 0, 1];
        assert_eq!(apply_modelist(&slave, &modelist), 2);
        let term = termios::tcgetattr(&slave).unwrap();
        assert!(!term.local_modes.contains(LocalModes::ECHO));
        assert_eq!(term.special_codes[Sc::VINTR], 3);
    }

    #[test]
    fn window_size_round_trips_through_pty() {
        let (master, _slave) = open_pair();
        set_window_size(&master, 132, 50, 0, 0).unwrap();
        assert_eq!(window_size(&master).unwrap(), (132, 50));
    }
}
