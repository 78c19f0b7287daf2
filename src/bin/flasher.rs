// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![cfg_attr(all(target_arch = "riscv64", target_os = "none"), no_std, no_main)]

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod firmware {
    use cheshire_flash::bsp::Bsp;
    use cheshire_flash::clock::{self, ClockContext};
    use cheshire_flash::config::{self, regs, FlashConfig};
    use cheshire_flash::diag::{self, SinkLogger};
    use cheshire_flash::dispatch::dispatch;
    use cheshire_flash::error::FlashError;
    use cheshire_flash::platform::CheshireDevices;
    use cheshire_flash::soc::clint::{Clint, Mcycle, CLINT_BASE};
    use cheshire_flash::soc::uart::{Uart, UART_BASE};
    use cheshire_flash::transfer::{PhysicalImage, Report};
    use riscv_rt::entry;

    cfg_if::cfg_if! {
        if #[cfg(feature = "target-board-genesys2")] {
            use cheshire_flash::bsp::genesys2::Board;
        } else if #[cfg(feature = "target-board-vcu128")] {
            use cheshire_flash::bsp::vcu128::Board;
        } else if #[cfg(feature = "target-board-sim")] {
            use cheshire_flash::bsp::sim::Board;
        } else {
            compile_error!("no BSP selected; enable a target-board-* feature");
        }
    }

    /// Reference ticks over which the core clock is measured.
    const CORE_MEASURE_TICKS: u64 = 2500;

    // Safety: the UART is part of the SoC and always mapped there.
    static LOGGER: SinkLogger<Uart> =
        SinkLogger::new(unsafe { Uart::at(UART_BASE) }, diag::default_level());

    /// Flasher entry point. `riscv_rt` has set up the stack, zeroed `.bss` and
    /// parked every hart but the first by the time we get here.
    #[entry]
    fn main() -> ! {
        let status = match run() {
            Ok(report) => {
                log::info!(
                    "done: {} sectors from sector {}",
                    report.sectors,
                    report.first_sector
                );
                0
            }
            Err(e) => {
                log::error!("flash failed: {}", e);
                e.code()
            }
        };
        // Safety: the SoC register file is always mapped.
        unsafe { config::publish_result(status) };
        halt()
    }

    fn run() -> Result<Report, FlashError> {
        // Safety: the SoC register file and the CLINT are always mapped, and
        // nothing else runs on this machine while we do.
        let (reference_hz, clint) =
            unsafe { (config::reference_frequency(), Clint::at(CLINT_BASE)) };

        // Until this succeeds the UART has no baud rate, so a failure here is
        // only visible in the result register.
        let core_hz =
            clock::measure_core_frequency(&clint, &Mcycle, reference_hz, CORE_MEASURE_TICKS)?;
        LOGGER.sink().init(core_hz, Board::UART_BAUD);
        diag::install(&LOGGER);

        log::info!("cheshire-flash {} on {}", env!("CARGO_PKG_VERSION"), Board::NAME);
        // Safety: as above.
        let boot_mode = unsafe { core::ptr::read_volatile(regs::BOOT_MODE as *const u32) };
        log::debug!("boot mode pins {:#x}", boot_mode);

        // Safety: as above. The loader is responsible for the image region
        // being real memory that we own until we publish a result.
        let (config, mut devices) =
            unsafe { (FlashConfig::from_scratch()?, CheshireDevices::<Board>::new()) };
        let mut image = unsafe { PhysicalImage::new(config.request.image_base) };

        let clock = ClockContext {
            reference_hz,
            core_hz,
        };
        dispatch(&mut devices, &clint, &mut image, &config, clock)
    }

    fn halt() -> ! {
        loop {
            // Safety: `wfi` has no effect beyond pausing the hart.
            #[allow(unused_unsafe)]
            unsafe {
                riscv::asm::wfi()
            };
        }
    }

    #[panic_handler]
    fn panic_handler(info: &core::panic::PanicInfo) -> ! {
        log::error!("panic: {}", info);
        halt()
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn main() {
    eprintln!("the flasher only runs on the SoC; build it with `cargo xtask build`");
    std::process::exit(1);
}
