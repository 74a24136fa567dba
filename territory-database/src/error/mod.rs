/*!
Errors that can happen when decoding table data.
*/

pub mod table;
