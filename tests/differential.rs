//! End-to-end scenarios comparing the direct interpreter against the JIT
//! driver from byte-identical bus state: both backends must agree on the
//! next dispatch address and on every register/flag touched by the
//! scenario, since the interpreter is the oracle the generated bodies are
//! checked against.

use std::cell::RefCell;
use std::rc::Rc;

use mos6502_jit::cache::{MethodCache, DEFAULT_CAPACITY};
use mos6502_jit::cpu::Hal;
use mos6502_jit::devices::build_c64_bus;
use mos6502_jit::driver::Driver;
use mos6502_jit::interpreter;
use mos6502_jit::rom::C64Image;

const LOAD_ADDRESS: u16 = 0x0600;

/// Builds two independent `Hal`s over byte-identical memory: one to run
/// through the interpreter, one through a fresh JIT driver.
fn make_pair(data: Vec<u8>) -> (Hal, Hal) {
    let image = C64Image {
        load_address: LOAD_ADDRESS,
        data,
    };
    (Hal::new(build_c64_bus(&image)), Hal::new(build_c64_bus(&image)))
}

fn new_driver() -> Driver {
    let cache = Rc::new(RefCell::new(MethodCache::new(DEFAULT_CAPACITY)));
    Driver::new(cache, false)
}

#[test]
fn adc_signed_overflow_sets_carry_clear_and_overflow_set() {
    // LDA #$7F; CLC; ADC #$01; RTS
    let (mut interp, mut jit) = make_pair(vec![0xA9, 0x7F, 0x18, 0x69, 0x01, 0x60]);
    let ret = 0x0700u16;
    interp.push_u16(ret.wrapping_sub(1));
    jit.push_u16(ret.wrapping_sub(1));

    let interp_next = interpreter::run(&mut interp, LOAD_ADDRESS).unwrap();
    let mut driver = new_driver();
    let jit_next = driver.run_one(&mut jit, LOAD_ADDRESS).unwrap();

    assert_eq!(interp_next, ret);
    assert_eq!(jit_next, ret);
    assert_eq!(interp.a(), 0x80);
    assert_eq!(jit.a(), 0x80);
    assert!(!interp.flag(mos6502_jit::ir::FlagName::Carry));
    assert!(interp.flag(mos6502_jit::ir::FlagName::Overflow));
    assert!(interp.flag(mos6502_jit::ir::FlagName::Negative));
    assert!(!interp.flag(mos6502_jit::ir::FlagName::Zero));
    assert_eq!(interp.status_byte(), jit.status_byte());
}

#[test]
fn sbc_signed_overflow_sets_carry_and_overflow() {
    // LDA #$80; SEC; SBC #$01; RTS  (-128 - 1, signed overflow)
    let (mut interp, mut jit) = make_pair(vec![0xA9, 0x80, 0x38, 0xE9, 0x01, 0x60]);
    let ret = 0x0700u16;
    interp.push_u16(ret.wrapping_sub(1));
    jit.push_u16(ret.wrapping_sub(1));

    let interp_next = interpreter::run(&mut interp, LOAD_ADDRESS).unwrap();
    let mut driver = new_driver();
    let jit_next = driver.run_one(&mut jit, LOAD_ADDRESS).unwrap();

    assert_eq!(interp_next, ret);
    assert_eq!(jit_next, ret);
    assert_eq!(interp.a(), 0x7F);
    assert_eq!(jit.a(), 0x7F);
    assert!(interp.flag(mos6502_jit::ir::FlagName::Carry));
    assert!(interp.flag(mos6502_jit::ir::FlagName::Overflow));
    assert!(!interp.flag(mos6502_jit::ir::FlagName::Zero));
    assert!(!interp.flag(mos6502_jit::ir::FlagName::Negative));
    assert_eq!(interp.status_byte(), jit.status_byte());
}

#[test]
fn indirect_jmp_replicates_page_boundary_bug() {
    // JMP ($02FF): pointer low byte is 0xFF, so the high byte of the target
    // must come from $0200, not $0300. The pointer bytes themselves are
    // poked directly below, well clear of the load address.
    let data = vec![0x6C, 0xFF, 0x02];
    let (mut interp, mut jit) = make_pair(data);

    interp.bus.write(0x02FF, 0x00); // target low byte
    interp.bus.write(0x0200, 0x07); // target high byte, read per the bug
    interp.bus.write(0x0300, 0xFF); // decoy: would be read if the bug weren't replicated
    jit.bus.write(0x02FF, 0x00);
    jit.bus.write(0x0200, 0x07);
    jit.bus.write(0x0300, 0xFF);

    let interp_next = interpreter::run(&mut interp, LOAD_ADDRESS).unwrap();
    let mut driver = new_driver();
    let jit_next = driver.run_one(&mut jit, LOAD_ADDRESS).unwrap();

    assert_eq!(interp_next, 0x0700);
    assert_eq!(jit_next, 0x0700);
}

#[test]
fn self_modifying_store_is_visible_on_the_next_dispatch() {
    // LDA #$05; STA $0606 (overwrites LDX's own operand byte); LDX #$00; RTS
    let (mut interp, mut jit) = make_pair(vec![0xA9, 0x05, 0x8D, 0x06, 0x06, 0xA2, 0x00, 0x60]);
    let mut driver = new_driver();

    let interp_bail = interpreter::run(&mut interp, LOAD_ADDRESS).unwrap();
    let jit_bail = driver.run_one(&mut jit, LOAD_ADDRESS).unwrap();

    // Both backends must stop right after the store instead of running the
    // stale LDX that was already fetched/queued before the write landed.
    assert_eq!(interp_bail, 0x0605);
    assert_eq!(jit_bail, 0x0605);
    assert_eq!(interp.a(), 0x05);
    assert_eq!(jit.a(), 0x05);

    let ret = 0x0700u16;
    interp.push_u16(ret.wrapping_sub(1));
    jit.push_u16(ret.wrapping_sub(1));

    let interp_next = interpreter::run(&mut interp, interp_bail).unwrap();
    let jit_next = driver.run_one(&mut jit, jit_bail).unwrap();

    assert_eq!(interp_next, ret);
    assert_eq!(jit_next, ret);
    // LDX's operand was rewritten from 0x00 to 0x05 by the store above.
    assert_eq!(interp.x(), 0x05);
    assert_eq!(jit.x(), 0x05);
}

#[test]
fn jsr_rts_round_trip_resumes_the_caller() {
    // Caller at $0600: JSR $0610; LDA #$FF; RTS
    // Callee at $0610: LDX #$09; RTS
    let mut data = vec![0x20, 0x10, 0x06, 0xA9, 0xFF, 0x60];
    data.resize(0x0610 - LOAD_ADDRESS as usize, 0);
    data.extend_from_slice(&[0xA2, 0x09, 0x60]);
    let (mut interp, mut jit) = make_pair(data);
    let ret = 0x0700u16;
    interp.push_u16(ret.wrapping_sub(1));
    jit.push_u16(ret.wrapping_sub(1));

    let interp_next = interpreter::run(&mut interp, LOAD_ADDRESS).unwrap();
    let mut driver = new_driver();
    let jit_next = driver.run_one(&mut jit, LOAD_ADDRESS).unwrap();

    assert_eq!(interp_next, ret);
    assert_eq!(jit_next, ret);
    assert_eq!(interp.a(), 0xFF);
    assert_eq!(jit.a(), 0xFF);
    assert_eq!(interp.x(), 0x09);
    assert_eq!(jit.x(), 0x09);
}

#[test]
fn jsr_trampoline_divergence_unwinds_to_the_rewritten_target() {
    // Caller at $0600: JSR $0610; LDA #$FF; RTS  (LDA/RTS must NOT run:
    //   the callee rewrites its own return address on the stack before
    //   RTS-ing, landing at $0630 instead of the JSR's static fall-through.)
    // Callee at $0610: discards the pushed return address and pushes
    //   $062F instead, so its RTS lands at $0630.
    // Target at $0630: LDX #$99; RTS.
    let mut data = vec![0x20, 0x10, 0x06, 0xA9, 0xFF, 0x60];
    data.resize(0x0610 - LOAD_ADDRESS as usize, 0);
    data.extend_from_slice(&[
        0x68, 0x68, // PLA, PLA: discard the pushed return address
        0xA9, 0x2F, 0x48, // LDA #$2F; PHA
        0xA9, 0x06, 0x48, // LDA #$06; PHA
        0x60, // RTS -> $0630
    ]);
    data.resize(0x0630 - LOAD_ADDRESS as usize, 0);
    data.extend_from_slice(&[0xA2, 0x99, 0x60]); // LDX #$99; RTS

    let (mut interp, mut jit) = make_pair(data);
    let ret = 0x0700u16;
    interp.push_u16(ret.wrapping_sub(1));
    jit.push_u16(ret.wrapping_sub(1));
    let mut driver = new_driver();

    let interp_diverted = interpreter::run(&mut interp, LOAD_ADDRESS).unwrap();
    let jit_diverted = driver.run_one(&mut jit, LOAD_ADDRESS).unwrap();
    assert_eq!(interp_diverted, 0x0630);
    assert_eq!(jit_diverted, 0x0630);

    let interp_next = interpreter::run(&mut interp, interp_diverted).unwrap();
    let jit_next = driver.run_one(&mut jit, jit_diverted).unwrap();
    assert_eq!(interp_next, ret);
    assert_eq!(jit_next, ret);
    assert_eq!(interp.x(), 0x99);
    assert_eq!(jit.x(), 0x99);
}

#[test]
fn brk_dispatches_past_a_nested_call_and_rti_resumes_inside_it() {
    // Caller at $0600: JSR $0610; LDA #$FF; RTS            (LDA/RTS must
    //   NOT run on the first dispatch: BRK below unwinds past this frame.)
    // Callee at $0610: BRK; LDX #$09; RTS
    // Handler at $0620 (wired via the BRK/IRQ vector): LDA #$42; RTI
    let mut data = vec![0x20, 0x10, 0x06, 0xA9, 0xFF, 0x60];
    data.resize(0x0610 - LOAD_ADDRESS as usize, 0);
    data.extend_from_slice(&[0x00, 0x00, 0xA2, 0x09, 0x60]); // BRK, pad, LDX #$09, RTS
    data.resize(0x0620 - LOAD_ADDRESS as usize, 0);
    data.extend_from_slice(&[0xA9, 0x42, 0x40]); // LDA #$42; RTI
    let (mut interp, mut jit) = make_pair(data);

    for hal in [&mut interp, &mut jit] {
        hal.bus.write(0xFFFE, 0x20);
        hal.bus.write(0xFFFF, 0x06);
    }
    let ret = 0x0700u16;
    interp.push_u16(ret.wrapping_sub(1));
    jit.push_u16(ret.wrapping_sub(1));
    let mut driver = new_driver();

    // Dispatch 1: JSR into the callee, which immediately BRKs. Both
    // backends must unwind straight to the handler vector, never touching
    // the caller's post-JSR LDA.
    let interp_d1 = interpreter::run(&mut interp, LOAD_ADDRESS).unwrap();
    let jit_d1 = driver.run_one(&mut jit, LOAD_ADDRESS).unwrap();
    assert_eq!(interp_d1, 0x0620);
    assert_eq!(jit_d1, 0x0620);

    // Dispatch 2: the handler runs and RTIs back to BRK's PC+2, inside the
    // callee, not back in the caller.
    let interp_d2 = interpreter::run(&mut interp, interp_d1).unwrap();
    let jit_d2 = driver.run_one(&mut jit, jit_d1).unwrap();
    assert_eq!(interp_d2, 0x0612);
    assert_eq!(jit_d2, 0x0612);
    assert_eq!(interp.a(), 0x42);
    assert_eq!(jit.a(), 0x42);

    // Dispatch 3: LDX/RTS in the callee, returning to the caller's LDA via
    // the JSR return address that was still sitting under the BRK frame.
    let interp_d3 = interpreter::run(&mut interp, interp_d2).unwrap();
    let jit_d3 = driver.run_one(&mut jit, jit_d2).unwrap();
    assert_eq!(interp_d3, 0x0603);
    assert_eq!(jit_d3, 0x0603);
    assert_eq!(interp.x(), 0x09);
    assert_eq!(jit.x(), 0x09);

    // Dispatch 4: back in the caller, LDA/RTS to the test's own sentinel.
    let interp_d4 = interpreter::run(&mut interp, interp_d3).unwrap();
    let jit_d4 = driver.run_one(&mut jit, jit_d3).unwrap();
    assert_eq!(interp_d4, ret);
    assert_eq!(jit_d4, ret);
    assert_eq!(interp.a(), 0xFF);
    assert_eq!(jit.a(), 0xFF);
}
