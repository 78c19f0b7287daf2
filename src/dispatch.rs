// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot-target dispatch: from a decoded request to a finished transfer.

use crate::backend::Backend;
use crate::clock::{settle_ticks, ClockContext, Delay, Timer};
use crate::config::{FlashConfig, TransferRequest};
use crate::error::{BackendKind, Direction, FlashError};
use crate::gpt::resolve;
use crate::transfer::{transfer, ImageMemory, Report};

/// Constructs backends on demand. Each platform provides one.
pub trait Devices {
    /// Builds a fresh backend of the given kind, owning the bus it sits on.
    /// The backend is not initialized yet.
    fn open(&mut self, kind: BackendKind, clock: &ClockContext) -> &mut dyn Backend;
}

/// Runs one flash attempt as described by `config`.
pub fn dispatch(
    devices: &mut dyn Devices,
    timer: &dyn Timer,
    image: &mut dyn ImageMemory,
    config: &FlashConfig,
    clock: ClockContext,
) -> Result<Report, FlashError> {
    // Logged once, by the caller.
    let Some(kind) = config.mode.backend() else {
        return Err(FlashError::UnsupportedMode(config.mode.raw()));
    };

    log::info!(
        "target {}, core {} Hz, reference {} Hz",
        kind,
        clock.core_hz,
        clock.reference_hz
    );
    let delay = Delay::new(timer, clock);
    let backend = devices.open(kind, &clock);
    flash(backend, &delay, image, &config.request, config.direction)
}

/// Brings up `backend` and moves the requested sectors.
pub fn flash(
    backend: &mut dyn Backend,
    delay: &Delay<'_>,
    image: &mut dyn ImageMemory,
    request: &TransferRequest,
    direction: Direction,
) -> Result<Report, FlashError> {
    let kind = backend.kind();
    match backend.bus_frequency() {
        Some(hz) => log::info!("{}: bus at {} Hz", kind, hz),
        None => log::info!("{}: bus at protocol default", kind),
    }

    backend
        .init(delay)
        .map_err(|cause| FlashError::DeviceInit { kind, cause })?;

    if let Some(us) = backend.settle_delay_us() {
        let ticks = settle_ticks(us, delay.clock().reference_hz);
        log::debug!("{}: settling for {} us ({} ticks)", kind, us, ticks);
        delay.spin_ticks(ticks)?;
    }

    let span = resolve(backend, request)?;
    log::info!(
        "{} {} sectors at sector {}, image at {:#x}",
        direction,
        span.length,
        span.offset,
        request.image_base
    );
    let report = transfer(backend, image, span, direction)?;
    log::info!("{} bytes done", report.bytes);
    Ok(report)
}
