//! ブートローダ遷移
//!
//! リセットをまたいで保持されるRAMワードに遷移先を書き込み、MCUをリセットします。
//! ソフト側は常駐ブートスタブがこのワードを参照します。ハード側は起動直後に
//! [`check_and_jump`] がシステムROM（DFU）へジャンプします。

use core::mem::MaybeUninit;
use core::ptr::addr_of_mut;

use interceptor_core::can_protocol::SpecialCommand;

use crate::fmt::*;

/// ブートスタブ滞在要求（ディレクティブ末尾4バイト）
const BOOT_MAGIC_SOFT: u32 = 0x0AB0_0B1E;

/// システムROM DFU要求
const BOOT_MAGIC_HARD: u32 = 0x02B0_0B1E;

/// STM32G4 システムメモリ先頭（ベクタテーブル）
const SYSTEM_MEMORY: u32 = 0x1FFF_0000;

#[link_section = ".uninit.BOOT_REQUEST"]
static mut BOOT_REQUEST: MaybeUninit<u32> = MaybeUninit::uninit();

fn read_request() -> u32 {
    // SAFETY: .uninitに配置された単一ワード。起動直後と割り込み外からのみアクセス
    unsafe { core::ptr::read_volatile(addr_of_mut!(BOOT_REQUEST).cast::<u32>()) }
}

fn write_request(value: u32) {
    // SAFETY: 同上
    unsafe { core::ptr::write_volatile(addr_of_mut!(BOOT_REQUEST).cast::<u32>(), value) }
}

/// 遷移要求を記録してリセット（戻らない）
///
/// 呼び出し前に出力は中立化されていること。
pub fn enter(kind: SpecialCommand) -> ! {
    let magic = match kind {
        SpecialCommand::SoftBootloader => BOOT_MAGIC_SOFT,
        SpecialCommand::HardBootloader => BOOT_MAGIC_HARD,
    };
    warn!("Resetting into bootloader ({})", kind);
    write_request(magic);
    cortex_m::peripheral::SCB::sys_reset()
}

/// 起動直後に呼び出す。ハード要求があればシステムROMへジャンプ
///
/// ソフト要求はブートスタブが消費するため、ここに残っていればスタブ不在として破棄する。
pub fn check_and_jump() {
    let request = read_request();
    write_request(0);

    match request {
        BOOT_MAGIC_HARD => {
            // SAFETY: ペリフェラル初期化前。ROMのベクタテーブルへ制御を渡す
            unsafe { cortex_m::asm::bootload(SYSTEM_MEMORY as *const u32) }
        }
        BOOT_MAGIC_SOFT => {
            warn!("Soft bootloader request without bootstub, continuing");
        }
        _ => {}
    }
}
