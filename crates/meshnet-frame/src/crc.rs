//! CRC16/XMODEM (polynomial 0x1021, initial value 0, no reflection).

/// Generator polynomial.
pub const CRC16_POLY: u16 = 0x1021;

/// Feed one byte into a running CRC16/XMODEM value.
pub fn crc16_xmodem_update(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ ((byte as u16) << 8);
    for _ in 0..8 {
        if crc & 0x8000 != 0 {
            crc = (crc << 1) ^ CRC16_POLY;
        } else {
            crc <<= 1;
        }
    }
    crc
}

/// Calculate the CRC16/XMODEM of `data`.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |crc, &byte| crc16_xmodem_update(crc, byte))
}
