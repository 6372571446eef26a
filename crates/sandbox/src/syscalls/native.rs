//! libc-style helpers served by the host: the guest heap lives in the
//! machine's arena, and bulk memory operations run at host speed.

use core::cmp::Ordering;

use types::ObjectGraph;
use vm::Machine;

use super::{sysargs, SyscallResult};
use crate::engine::SandboxCore;
use crate::error::SandboxError;
use crate::global::Config;

const EBADF: i32 = 9;

fn bounded(len: u32) -> Result<usize, SandboxError> {
    let len = len as usize;
    if len > Config::MAX_VECTOR_BYTES {
        return Err(SandboxError::InvalidArgument(format!("memory operation of {len} bytes")));
    }
    Ok(len)
}

fn ordering_result(ordering: Ordering) -> u32 {
    match ordering {
        Ordering::Less => -1i32 as u32,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

pub(super) fn sys_write<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (fd, buf, len): (i32, u32, u32) = sysargs(machine);
    if fd != 1 && fd != 2 {
        machine.set_result((-EBADF) as u32);
        return Ok(());
    }
    let bytes = machine.memory.read_bytes(buf, bounded(len)?)?;
    let text = String::from_utf8_lossy(&bytes);
    core.host.print(text.trim_end_matches('\n'));
    machine.set_result(len);
    Ok(())
}

pub(super) fn sys_exit(machine: &mut Machine) -> SyscallResult {
    let (code,): (i32,) = sysargs(machine);
    log::debug!("guest exit({code})");
    machine.stop();
    Ok(())
}

pub(super) fn sys_malloc(machine: &mut Machine) -> SyscallResult {
    let (size,): (u32,) = sysargs(machine);
    let addr = machine.arena.malloc(size).unwrap_or(0);
    machine.set_result(addr);
    Ok(())
}

pub(super) fn sys_calloc(machine: &mut Machine) -> SyscallResult {
    let (count, size): (u32, u32) = sysargs(machine);
    let addr = count.checked_mul(size).and_then(|len| Some((machine.arena.malloc(len)?, len)));
    match addr {
        Some((addr, len)) => {
            machine.memory.memset(addr, 0, len as usize)?;
            machine.set_result(addr);
        }
        None => machine.set_result(0),
    }
    Ok(())
}

pub(super) fn sys_realloc(machine: &mut Machine) -> SyscallResult {
    let (addr, size): (u32, u32) = sysargs(machine);
    if addr == 0 {
        let new = machine.arena.malloc(size).unwrap_or(0);
        machine.set_result(new);
        return Ok(());
    }
    if size == 0 {
        machine.arena.free(addr);
        machine.set_result(0);
        return Ok(());
    }
    let Some(old_len) = machine.arena.chunk_size(addr) else {
        return Err(SandboxError::InvalidArgument(format!("realloc of unknown chunk 0x{addr:08x}")));
    };
    if machine.arena.resize_in_place(addr, size) {
        machine.set_result(addr);
        return Ok(());
    }
    match machine.arena.malloc(size) {
        Some(new) => {
            machine.memory.memmove(new, addr, old_len.min(size) as usize)?;
            machine.arena.free(addr);
            machine.set_result(new);
        }
        None => machine.set_result(0),
    }
    Ok(())
}

pub(super) fn sys_free(machine: &mut Machine) -> SyscallResult {
    let (addr,): (u32,) = sysargs(machine);
    let ok = addr == 0 || machine.arena.free(addr);
    if !ok {
        log::warn!("free of unknown chunk 0x{addr:08x}");
    }
    machine.set_result(if ok { 0 } else { -1i32 as u32 });
    Ok(())
}

/// Writes `{ bytes_free, bytes_used, chunks_used, heap_size }` as four
/// 32-bit words.
pub(super) fn sys_meminfo(machine: &mut Machine) -> SyscallResult {
    let (out,): (u32,) = sysargs(machine);
    let info = machine.arena.info();
    for (i, word) in [info.bytes_free, info.bytes_used, info.chunks_used, machine.arena.size()].into_iter().enumerate() {
        machine.memory.write_u32(out.wrapping_add(i as u32 * 4), word)?;
    }
    machine.set_result(0);
    Ok(())
}

pub(super) fn sys_memcpy(machine: &mut Machine) -> SyscallResult {
    let (dst, src, len): (u32, u32, u32) = sysargs(machine);
    machine.memory.memmove(dst, src, bounded(len)?)?;
    machine.set_result(dst);
    Ok(())
}

pub(super) fn sys_memset(machine: &mut Machine) -> SyscallResult {
    let (dst, value, len): (u32, u32, u32) = sysargs(machine);
    machine.memory.memset(dst, value as u8, bounded(len)?)?;
    machine.set_result(dst);
    Ok(())
}

pub(super) fn sys_memmove(machine: &mut Machine) -> SyscallResult {
    sys_memcpy(machine)
}

pub(super) fn sys_memcmp(machine: &mut Machine) -> SyscallResult {
    let (a, b, len): (u32, u32, u32) = sysargs(machine);
    let len = bounded(len)?;
    let left = machine.memory.read_bytes(a, len)?;
    let right = machine.memory.read_bytes(b, len)?;
    machine.set_result(ordering_result(left.cmp(&right)));
    Ok(())
}

pub(super) fn sys_strlen(machine: &mut Machine) -> SyscallResult {
    let (s,): (u32,) = sysargs(machine);
    let bytes = machine.memory.read_cstring(s, Config::MAX_STRING_LEN)?;
    machine.set_result(bytes.len() as u32);
    Ok(())
}

pub(super) fn sys_strncmp(machine: &mut Machine) -> SyscallResult {
    let (a, b, n): (u32, u32, u32) = sysargs(machine);
    let n = (n as usize).min(Config::MAX_STRING_LEN);
    let left = machine.memory.read_cstring(a, n)?;
    let right = machine.memory.read_cstring(b, n)?;
    machine.set_result(ordering_result(left.cmp(&right)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use vm::Register;

    fn machine() -> Machine {
        Machine::new(&SandboxConfig::default().machine_options()).unwrap()
    }

    fn set_args(machine: &mut Machine, args: &[u32]) {
        for (i, value) in args.iter().enumerate() {
            machine.cpu.set_reg(Register::A0.index() + i, *value);
        }
    }

    #[test]
    fn heap_calls_use_the_arena() {
        let mut m = machine();
        set_args(&mut m, &[64]);
        sys_malloc(&mut m).unwrap();
        let first = m.cpu.get(Register::A0);
        assert!(m.arena.contains(first));

        m.memory.write(first, b"abcdefgh").unwrap();
        set_args(&mut m, &[first, 4096]);
        sys_realloc(&mut m).unwrap();
        let moved = m.cpu.get(Register::A0);
        assert_eq!(m.memory.read_bytes(moved, 8).unwrap(), b"abcdefgh");

        set_args(&mut m, &[moved]);
        sys_free(&mut m).unwrap();
        assert_eq!(m.cpu.get(Register::A0), 0);
        set_args(&mut m, &[moved]);
        sys_free(&mut m).unwrap();
        assert_eq!(m.cpu.get(Register::A0) as i32, -1);
    }

    #[test]
    fn string_compares_follow_c() {
        let mut m = machine();
        set_args(&mut m, &[32]);
        sys_malloc(&mut m).unwrap();
        let buf = m.cpu.get(Register::A0);
        m.memory.write(buf, b"apple\0apply\0").unwrap();

        set_args(&mut m, &[buf]);
        sys_strlen(&mut m).unwrap();
        assert_eq!(m.cpu.get(Register::A0), 5);

        set_args(&mut m, &[buf, buf + 6, 4]);
        sys_strncmp(&mut m).unwrap();
        assert_eq!(m.cpu.get(Register::A0), 0);
        set_args(&mut m, &[buf, buf + 6, 5]);
        sys_strncmp(&mut m).unwrap();
        assert_eq!(m.cpu.get(Register::A0) as i32, -1);
    }

    #[test]
    fn oversized_copies_are_rejected() {
        let mut m = machine();
        set_args(&mut m, &[0x2000_0000, 0x2000_1000, u32::MAX]);
        assert!(matches!(sys_memcpy(&mut m), Err(SandboxError::InvalidArgument(_))));
    }
}
