use crate::ServiceError;

/// A Bluetooth Device Address (`BD_ADDR`), the immutable identity of a Connection Record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, defmt::Format)]
pub struct BluetoothAddress(pub [u8; 6]);

impl BluetoothAddress {
    /// Create a new Bluetooth address from bytes
    #[must_use]
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// The all-zero address, used as "no device"
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Format the address as a colon-separated hex string
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";

        let mut result = heapless::String::new();
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                result.push(':').ok();
            }
            result.push(char::from(HEX[usize::from(byte >> 4)])).ok();
            result.push(char::from(HEX[usize::from(byte & 0x0F)])).ok();
        }
        result
    }

    /// Parse a Bluetooth address from a colon-separated hex string
    ///
    /// # Errors
    /// Returns `ServiceError::InvalidArgument` if the string is not `XX:XX:XX:XX:XX:XX`
    pub fn from_hex(hex: &str) -> Result<Self, ServiceError> {
        if hex.len() != 17 {
            return Err(ServiceError::InvalidArgument);
        }

        let mut bytes = [0u8; 6];
        let mut parts = hex.split(':');
        for byte in &mut bytes {
            let part = parts.next().ok_or(ServiceError::InvalidArgument)?;
            if part.len() != 2 {
                return Err(ServiceError::InvalidArgument);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ServiceError::InvalidArgument)?;
        }
        if parts.next().is_some() {
            return Err(ServiceError::InvalidArgument);
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 6]> for BluetoothAddress {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<BluetoothAddress> for [u8; 6] {
    fn from(addr: BluetoothAddress) -> Self {
        addr.0
    }
}

impl From<BluetoothAddress> for bt_hci::param::BdAddr {
    fn from(addr: BluetoothAddress) -> Self {
        bt_hci::param::BdAddr::new(addr.0)
    }
}

impl TryFrom<&str> for BluetoothAddress {
    type Error = ServiceError;

    fn try_from(hex: &str) -> Result<Self, Self::Error> {
        BluetoothAddress::from_hex(hex)
    }
}

impl TryFrom<&[u8]> for BluetoothAddress {
    type Error = ServiceError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let addr: [u8; 6] = bytes.try_into().map_err(|_| ServiceError::InvalidArgument)?;
        Ok(BluetoothAddress(addr))
    }
}

impl TryFrom<bt_hci::param::BdAddr> for BluetoothAddress {
    type Error = ServiceError;

    fn try_from(bd_addr: bt_hci::param::BdAddr) -> Result<Self, Self::Error> {
        bd_addr.raw().try_into()
    }
}
