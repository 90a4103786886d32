pub mod address;
pub mod error;
pub mod value;

pub use address::{
    Addr, CellAddr, Coord, MAX_COL, MAX_ROW, Notation, ParsedCellRef, ParsedRangeRef, ParsedRef,
    RangeAddr, col_to_label, label_to_col,
};
pub use error::{CellError, ErrorKind};
pub use value::{
    CellValue, LEAP_1900_SERIAL, SERIAL_MAX, days_in_month, is_leap_year, serial_to_hms,
    serial_to_ymd, ymd_to_serial,
};
