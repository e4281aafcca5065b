//! Hardware serial port backend

use super::claims::PortClaim;
use super::{ChannelError, ChannelOptions, ChannelSpec, SerialChannel};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use tracing::{error, info};

/// Open a hardware serial channel with 8 data bits, no parity, one stop bit.
pub fn open(spec: ChannelSpec, options: &ChannelOptions) -> Result<SerialChannel, ChannelError> {
    let claim = PortClaim::acquire(&spec.port)?;

    let port = serialport::new(&spec.port, spec.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(options.read_timeout)
        .open()
        .map_err(|e| connection_error(&spec.port, &e))?;

    // Independent handle for the reader so a blocked read never holds the writer.
    let reader = port
        .try_clone()
        .map_err(|e| connection_error(&spec.port, &e))?;

    // POSIX handles keep their own timeout; Windows shares one per device.
    #[cfg(unix)]
    let port = {
        let mut port = port;
        port.set_timeout(options.write_timeout)
            .map_err(|e| connection_error(&spec.port, &e))?;
        port
    };

    Ok(SerialChannel::with_claim(
        spec,
        claim,
        Box::new(reader),
        Box::new(port),
    ))
}

/// Open both channels of a bridge, all-or-nothing.
///
/// If the second channel fails to open, the first one is closed before the
/// error is returned.
pub fn open_pair(
    a: ChannelSpec,
    b: ChannelSpec,
    options: &ChannelOptions,
) -> Result<(SerialChannel, SerialChannel), ChannelError> {
    let first = open(a, options)?;
    match open(b, options) {
        Ok(second) => {
            info!(a = %first.port(), b = %second.port(), "channel pair ready");
            Ok((first, second))
        }
        Err(e) => {
            error!(port = %e.port(), error = %e, "second channel failed, releasing {}", first.port());
            first.close();
            Err(e)
        }
    }
}

fn connection_error(port: &str, err: &serialport::Error) -> ChannelError {
    let reason = match err.kind() {
        serialport::ErrorKind::NoDevice => format!("device not found ({err})"),
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            format!("permission denied ({err})")
        }
        _ => err.to_string(),
    };
    ChannelError::Connection {
        port: port.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::ChannelMode;

    #[test]
    fn test_open_missing_device_is_connection_error() {
        let spec = ChannelSpec::new("/dev/comlink-missing-device", 9600, ChannelMode::ReadWrite);
        let err = open(spec, &ChannelOptions::default()).unwrap_err();
        assert!(matches!(err, ChannelError::Connection { .. }));
        assert_eq!(err.port(), "/dev/comlink-missing-device");
    }

    #[test]
    fn test_open_pair_fails_whole() {
        let a = ChannelSpec::new("/dev/comlink-missing-a", 9600, ChannelMode::ReadWrite);
        let b = ChannelSpec::new("/dev/comlink-missing-b", 9600, ChannelMode::ReadWrite);
        let err = open_pair(a, b, &ChannelOptions::default()).unwrap_err();
        assert_eq!(err.port(), "/dev/comlink-missing-a");
        // a failed open leaves no claim behind
        assert!(PortClaim::acquire("/dev/comlink-missing-a").is_ok());
    }
}
