use crate::{config::Parameter, resp_value::RespValue};

#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    Ping,
    Reveal(i64),
    Revealed(i64),
    Seen(i64),
    TimeRemaining(i64),
    Expire(i64),
    Clear,
    Sweep,
    Ids,
    Stats,
    ConfigGet(Parameter),
}

impl Request {
    pub fn from_resp(value: &RespValue) -> anyhow::Result<Self> {
        let RespValue::Array(elements) = value else {
            anyhow::bail!("requests must be arrays");
        };
        let words = elements
            .iter()
            .map(|element| {
                element
                    .as_str()
                    .ok_or_else(|| anyhow::format_err!("request arguments must be strings"))
            })
            .collect::<anyhow::Result<Vec<&str>>>()?;
        let Some((command, args)) = words.split_first() else {
            anyhow::bail!("empty request");
        };

        let command = command.to_ascii_lowercase();
        match command.as_str() {
            "ping" => Ok(Request::Ping),
            "reveal" => Ok(Request::Reveal(project_id(&command, args)?)),
            "revealed" => Ok(Request::Revealed(project_id(&command, args)?)),
            "seen" => Ok(Request::Seen(project_id(&command, args)?)),
            "pttl" => Ok(Request::TimeRemaining(project_id(&command, args)?)),
            "expire" => Ok(Request::Expire(project_id(&command, args)?)),
            "clear" => no_arguments(&command, args, Request::Clear),
            "sweep" => no_arguments(&command, args, Request::Sweep),
            "ids" => no_arguments(&command, args, Request::Ids),
            "stats" => no_arguments(&command, args, Request::Stats),
            "config" => match args {
                [sub, parameter] if sub.eq_ignore_ascii_case("get") => {
                    Ok(Request::ConfigGet(Parameter::deserialize(parameter)?))
                }
                _ => anyhow::bail!("malformed CONFIG command"),
            },
            command => anyhow::bail!("unknown command {:?}", command.to_uppercase()),
        }
    }
}

fn project_id(command: &str, args: &[&str]) -> anyhow::Result<i64> {
    match args {
        [id] => id.parse::<i64>().map_err(|_| {
            anyhow::format_err!("invalid project id {:?} for {}", id, command.to_uppercase())
        }),
        _ => anyhow::bail!("{} takes exactly one project id", command.to_uppercase()),
    }
}

fn no_arguments(command: &str, args: &[&str], request: Request) -> anyhow::Result<Request> {
    if args.is_empty() {
        Ok(request)
    } else {
        anyhow::bail!("{} takes no arguments", command.to_uppercase())
    }
}
