use std::{
    collections::BTreeMap,
    io::{Error, ErrorKind, Result},
};

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

use crate::bencoding::value::Value;
use crate::codec::AsyncDecoder;

const BUFFER_SIZE: usize = 1024 * 8;

impl AsyncDecoder for Value {
    async fn decode<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self> {
        let mut parser = Parser::new();
        let mut buf = [0; BUFFER_SIZE];
        loop {
            let read = stream.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            for byte in &buf[0..read] {
                parser.consume(*byte)?;
            }
        }
        parser.result()
    }
}

#[derive(Debug)]
struct Parser {
    state: State,
    stack: Vec<StackState>,
    position: usize,
}

#[derive(Debug)]
enum State {
    Ready,
    Integer(Option<i64>, i64),
    /// Saw `i0`, only the terminator may follow
    Zero,
    StringLength(usize),
    StringContents(Vec<u8>, usize),
    Done(Value),
}

#[derive(Debug)]
enum StackState {
    List(Vec<Value>),
    Dictionary(Option<String>, BTreeMap<String, Value>),
}

impl StackState {
    fn new_list() -> Self {
        Self::List(Vec::new())
    }

    fn new_dictionary() -> Self {
        Self::Dictionary(None, BTreeMap::new())
    }
}

impl Parser {
    fn new() -> Self {
        Self {
            state: State::Ready,
            stack: Vec::new(),
            position: 0,
        }
    }

    fn consume(&mut self, byte: u8) -> Result<()> {
        match (&mut self.state, byte) {
            // Integer
            (State::Ready, b'i') => {
                self.state = State::Integer(None, 1);
            }
            (State::Integer(None, sign), b'-') if *sign == 1 => {
                *sign = -1;
            }
            (State::Integer(None, sign), b'0') => {
                if *sign == -1 {
                    return Err(invalid("negative zero not allowed"));
                }
                self.state = State::Zero;
            }
            (State::Zero, b'e') => {
                self.emit(Value::Integer(0))?;
            }
            (State::Zero, b'0'..=b'9') => {
                return Err(invalid("leading zeros not allowed"));
            }
            (State::Integer(integer, sign), b'0'..=b'9') => {
                let digit = (byte - b'0') as i64;
                let next = integer
                    .unwrap_or(0)
                    .checked_mul(10)
                    .and_then(|n| n.checked_add(digit * *sign))
                    .ok_or_else(|| invalid("integer overflow"))?;
                *integer = Some(next);
            }
            (&mut State::Integer(Some(integer), _), b'e') => {
                self.emit(Value::Integer(integer))?;
            }

            // List
            (State::Ready, b'l') => {
                self.stack.push(StackState::new_list());
            }

            // Dictionary
            (State::Ready, b'd') => {
                self.stack.push(StackState::new_dictionary());
            }

            // String
            (State::Ready, b'0'..=b'9') => {
                let digit = (byte - b'0') as usize;
                self.state = State::StringLength(digit);
            }
            (State::StringLength(length), b'0'..=b'9') => {
                let digit = (byte - b'0') as usize;
                *length = length
                    .checked_mul(10)
                    .and_then(|n| n.checked_add(digit))
                    .ok_or_else(|| invalid("string length overflow"))?;
            }
            (&mut State::StringLength(0), b':') => {
                self.emit(Value::String(Vec::new()))?;
            }
            (&mut State::StringLength(length), b':') => {
                // Capacity is capped, the declared length is untrusted input
                let string = Vec::with_capacity(length.min(BUFFER_SIZE));
                self.state = State::StringContents(string, length);
            }
            (State::StringContents(bytes, length), _) => {
                bytes.push(byte);
                if bytes.len() == *length {
                    let string = std::mem::take(bytes);
                    self.emit(Value::String(string))?;
                }
            }

            // End collection
            (State::Ready, b'e') => match self.stack.pop() {
                Some(StackState::List(list)) => {
                    self.emit(Value::List(list))?;
                }
                Some(StackState::Dictionary(None, entries)) => {
                    self.emit(Value::Dictionary(entries))?;
                }
                Some(StackState::Dictionary(Some(key), _)) => {
                    return Err(invalid(&format!("missing value for key \"{key}\"")));
                }
                None => {
                    return Err(invalid("nothing to close"));
                }
            },

            // Ignore trailing whitespace
            (State::Done(_), b'\n' | b'\r' | b' ') => return Ok(()),

            // Unexpected input
            _ => {
                return Err(invalid(&format!(
                    "unexpected byte 0x{byte:02x} at position {}",
                    self.position
                )));
            }
        }
        self.position += 1;
        Ok(())
    }

    fn emit(&mut self, value: Value) -> Result<()> {
        match (self.stack.last_mut(), value) {
            (Some(StackState::List(list)), value) => {
                list.push(value);
                self.state = State::Ready;
            }
            (Some(StackState::Dictionary(key @ None, _)), Value::String(string)) => {
                let string = String::from_utf8(string)
                    .map_err(|_| invalid("dictionary key should be valid utf8"))?;
                *key = Some(string);
                self.state = State::Ready;
            }
            (Some(StackState::Dictionary(None, _)), _) => {
                return Err(invalid("only string keys are allowed in dictionaries"));
            }
            (Some(StackState::Dictionary(key @ Some(_), entries)), value) => {
                if let Some(key) = key.take() {
                    entries.insert(key, value);
                }
                self.state = State::Ready;
            }
            (None, value) => {
                self.state = State::Done(value);
            }
        }
        Ok(())
    }

    fn result(self) -> Result<Value> {
        match self.state {
            State::Done(value) => Ok(value),
            _ => Err(Error::new(ErrorKind::UnexpectedEof, "incomplete")),
        }
    }
}

fn invalid(message: &str) -> Error {
    Error::new(ErrorKind::InvalidData, message.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::io::BufReader;

    use super::*;

    async fn decode(input: &[u8]) -> Result<Value> {
        let cursor = Cursor::new(input);
        let mut buf = BufReader::new(cursor);
        Value::decode(&mut buf).await
    }

    #[tokio::test]
    async fn parse_error() {
        let result = decode(b"foo").await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn string() {
        let result = decode(b"3:foo").await;

        assert_eq!(result.unwrap(), Value::string("foo"));
    }

    #[tokio::test]
    async fn empty_string() {
        let result = decode(b"0:").await;

        assert_eq!(result.unwrap(), Value::string(""));
    }

    #[tokio::test]
    async fn binary_string() {
        let result = decode(b"2:\xff\x00").await;

        assert_eq!(result.unwrap(), Value::String(vec![0xff, 0x00]));
    }

    #[tokio::test]
    async fn positive_integer() {
        let result = decode(b"i3e").await;

        assert_eq!(result.unwrap(), Value::Integer(3));
    }

    #[tokio::test]
    async fn zero() {
        let result = decode(b"i0e").await;

        assert_eq!(result.unwrap(), Value::Integer(0));
    }

    #[tokio::test]
    async fn large_integer() {
        let result = decode(b"i5368709120e").await;

        assert_eq!(result.unwrap(), Value::Integer(5 * 1024 * 1024 * 1024));
    }

    #[tokio::test]
    async fn negative_integer() {
        let result = decode(b"i-42e").await;

        assert_eq!(result.unwrap(), Value::Integer(-42));
    }

    #[tokio::test]
    async fn fail_for_minus_zero() {
        let result = decode(b"i-0e").await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fail_for_leading_zero() {
        let result = decode(b"i03e").await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fail_for_overflow() {
        let result = decode(b"i99999999999999999999e").await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fail_for_truncated_input() {
        let result = decode(b"l3:foo").await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_empty_list() {
        let result = decode(b"li1ei2ei3ee").await;

        assert_eq!(
            result.unwrap(),
            Value::list()
                .with_value(Value::Integer(1))
                .with_value(Value::Integer(2))
                .with_value(Value::Integer(3))
        );
    }

    #[tokio::test]
    async fn non_empty_dictionary() {
        let result = decode(b"d3:cow3:moo4:spam4:eggse").await;

        assert_eq!(
            result.unwrap(),
            Value::dictionary()
                .with_entry("cow", Value::string("moo"))
                .with_entry("spam", Value::string("eggs"))
        );
    }

    #[tokio::test]
    async fn fail_for_non_string_keys() {
        let result = decode(b"di1ei2ee").await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fail_for_key_without_value() {
        let result = decode(b"d3:fooe").await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn deeply_nested_structure() {
        let result = decode(b"d3:food3:barl3:bazee3:quxi42ee").await;

        assert_eq!(
            result.unwrap(),
            Value::dictionary()
                .with_entry(
                    "foo",
                    Value::dictionary()
                        .with_entry("bar", Value::list().with_value(Value::string("baz")))
                )
                .with_entry("qux", Value::Integer(42))
        );
    }

    #[tokio::test]
    async fn ignore_trailing_whitespace() {
        let result = decode(b"i42e\n").await;

        assert_eq!(result.unwrap(), Value::Integer(42));
    }
}
