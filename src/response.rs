use bytes::BytesMut;

use crate::{config::Parameter, resp_value::RespValue, store::StoreStats};

#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    Pong,
    Ok,
    Bool(bool),
    Integer(i64),
    Ids(Vec<i64>),
    Stats(StoreStats),
    ConfigGet(Option<(Parameter, String)>),
    Error(String),
}

impl Response {
    pub fn serialize(&self, buf: &mut BytesMut) {
        let value = match self {
            Response::Pong => RespValue::simple("PONG"),
            Response::Ok => RespValue::simple("OK"),
            Response::Bool(b) => RespValue::Integer(i64::from(*b)),
            Response::Integer(n) => RespValue::Integer(*n),
            Response::Ids(ids) => RespValue::Array(
                ids.iter()
                    .map(|id| RespValue::bulk(id.to_string()))
                    .collect(),
            ),
            Response::Stats(stats) => {
                let fields = [
                    ("total", stats.total.to_string()),
                    ("active", stats.active.to_string()),
                    ("expired", stats.expired.to_string()),
                    (
                        "persistence",
                        if stats.persistence_available { "1" } else { "0" }.to_string(),
                    ),
                    ("storage_bytes", stats.storage_bytes.to_string()),
                ];
                RespValue::Array(
                    fields
                        .into_iter()
                        .flat_map(|(key, value)| [RespValue::bulk(key), RespValue::bulk(value)])
                        .collect(),
                )
            }
            Response::ConfigGet(Some((parameter, value))) => RespValue::Array(vec![
                RespValue::bulk(parameter.serialize()),
                RespValue::bulk(value.as_str()),
            ]),
            Response::ConfigGet(None) => RespValue::NullBulkString,
            Response::Error(message) => RespValue::error(format!("ERR {}", message)),
        };
        value.serialize(buf);
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::Response;
    use crate::{config::Parameter, store::StoreStats};

    fn encode(response: Response) -> String {
        let mut buf = BytesMut::new();
        response.serialize(&mut buf);
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn simple_replies() {
        assert_eq!(encode(Response::Pong), "+PONG\r\n");
        assert_eq!(encode(Response::Bool(true)), ":1\r\n");
        assert_eq!(encode(Response::Integer(1500)), ":1500\r\n");
        assert_eq!(
            encode(Response::Error("unknown command \"X\"".into())),
            "-ERR unknown command \"X\"\r\n"
        );
    }

    #[test]
    fn ids_and_config() {
        assert_eq!(
            encode(Response::Ids(vec![3, -1])),
            "*2\r\n$1\r\n3\r\n$2\r\n-1\r\n"
        );
        assert_eq!(
            encode(Response::ConfigGet(Some((Parameter::Port, "6380".into())))),
            "*2\r\n$4\r\nport\r\n$4\r\n6380\r\n"
        );
        assert_eq!(encode(Response::ConfigGet(None)), "$-1\r\n");
    }

    #[test]
    fn stats_as_flat_pairs() {
        let encoded = encode(Response::Stats(StoreStats {
            total: 2,
            active: 1,
            expired: 1,
            persistence_available: true,
            storage_bytes: 64,
        }));
        assert!(encoded.starts_with("*10\r\n$5\r\ntotal\r\n$1\r\n2\r\n"));
        assert!(encoded.ends_with("$13\r\nstorage_bytes\r\n$2\r\n64\r\n"));
    }
}
