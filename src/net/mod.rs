pub mod framed;
