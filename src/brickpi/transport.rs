// Byte transport between the driver and the board
//
// The BrickPi3 is a full-duplex SPI slave: every byte clocked out clocks one
// byte back, so a transfer always returns as many bytes as it sent.

use std::io;

pub trait Transport {
    /// Clock `out` to the board and return the bytes received in the same transfer
    fn transfer(&mut self, out: &[u8]) -> io::Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn transfer(&mut self, out: &[u8]) -> io::Result<Vec<u8>> {
        (**self).transfer(out)
    }
}

#[cfg(target_os = "linux")]
pub use self::spi::SpiTransport;

#[cfg(target_os = "linux")]
mod spi {
    use std::io;

    use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
    use tracing::info;

    use super::Transport;
    use crate::brickpi::protocol::SPI_SPEED_HZ;

    /// Linux spidev link to the board
    pub struct SpiTransport {
        spi: Spidev,
    }

    impl SpiTransport {
        /// Open and configure a spidev node, e.g. `/dev/spidev0.1`
        pub fn open(path: &str) -> io::Result<Self> {
            info!("Opening SPI device {}", path);
            let mut spi = Spidev::open(path)?;
            let options = SpidevOptions::new()
                .bits_per_word(8)
                .max_speed_hz(SPI_SPEED_HZ)
                .mode(SpiModeFlags::SPI_MODE_0)
                .build();
            spi.configure(&options)?;
            Ok(Self { spi })
        }
    }

    impl Transport for SpiTransport {
        fn transfer(&mut self, out: &[u8]) -> io::Result<Vec<u8>> {
            let mut rx = vec![0u8; out.len()];
            {
                let mut xfer = SpidevTransfer::read_write(out, &mut rx);
                self.spi.transfer(&mut xfer)?;
            }
            Ok(rx)
        }
    }
}
