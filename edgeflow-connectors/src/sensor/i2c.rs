//! I²C bus abstraction
//!
//! Drivers only see [`I2cBus`]; the Linux `i2c-dev` implementation is
//! compiled on Linux targets only.

use std::io;

/// Register-level access to one device on an I²C bus
pub trait I2cBus: Send {
    /// Write raw bytes to the device
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read raw bytes from the device
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<()>;

    /// Read consecutive registers starting at `register`
    fn read_registers(&mut self, register: u8, buffer: &mut [u8]) -> io::Result<()> {
        self.write(&[register])?;
        self.read(buffer)
    }

    /// Read one register
    fn read_register(&mut self, register: u8) -> io::Result<u8> {
        let mut value = [0u8; 1];
        self.read_registers(register, &mut value)?;
        Ok(value[0])
    }

    /// Write one register
    fn write_register(&mut self, register: u8, value: u8) -> io::Result<()> {
        self.write(&[register, value])
    }
}

impl<B: I2cBus + ?Sized> I2cBus for Box<B> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<()> {
        (**self).read(buffer)
    }
}

#[cfg(target_os = "linux")]
pub use linux::LinuxI2cBus;

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
mod linux {
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read, Write};
    use std::os::fd::AsRawFd;

    use super::I2cBus;

    /// `I2C_SLAVE` from `linux/i2c-dev.h`
    const I2C_SLAVE: u16 = 0x0703;

    nix::ioctl_write_int_bad!(i2c_set_slave, I2C_SLAVE);

    /// Device on a Linux `/dev/i2c-N` character device
    #[derive(Debug)]
    pub struct LinuxI2cBus {
        file: File,
        address: u16,
    }

    impl LinuxI2cBus {
        /// Open the bus and select the device at `address`
        pub fn open(path: &str, address: u16) -> io::Result<Self> {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            // SAFETY: the descriptor is owned by `file` and stays open for the call
            unsafe { i2c_set_slave(file.as_raw_fd(), libc_int(address)) }.map_err(io::Error::from)?;
            Ok(Self { file, address })
        }

        /// Selected device address
        pub fn address(&self) -> u16 {
            self.address
        }
    }

    fn libc_int(value: u16) -> nix::libc::c_int {
        nix::libc::c_int::from(value)
    }

    impl I2cBus for LinuxI2cBus {
        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.file.write_all(bytes)
        }

        fn read(&mut self, buffer: &mut [u8]) -> io::Result<()> {
            self.file.read_exact(buffer)
        }
    }
}
