fn runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

pub mod devices {
    use crate::{connection, output, KospelClient};

    /// List the devices attached to the controller.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Config,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not set up the controller client")]
        Client(#[source] crate::Error),
        #[error("could not list the devices")]
        List(#[source] crate::Error),
        #[error("could not output the device list")]
        Output(#[source] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = super::runtime().map_err(Error::Runtime)?;
        let client = KospelClient::new(args.connection).map_err(Error::Client)?;
        let devices = runtime.block_on(client.list_devices()).map_err(Error::List)?;
        let mut output = args.output.to_output().map_err(Error::Output)?;
        output.table_headers(vec!["ID", "Type", "Label", "Module"]).map_err(Error::Output)?;
        for device in &devices {
            output
                .record(
                    || {
                        vec![
                            device.id.to_string(),
                            device.device_type.to_string(),
                            device.label.clone(),
                            device.module.map(|m| m.to_string()).unwrap_or_default(),
                        ]
                    },
                    || device,
                )
                .map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)
    }
}

pub mod status {
    use crate::{connection, output, KospelClient};
    use tokio::time::MissedTickBehavior;

    /// Read the heater status.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Config,
        #[clap(flatten)]
        output: output::Args,
        /// Keep polling at this interval instead of reading once.
        ///
        /// Failed polls are logged and the loop continues.
        #[arg(long, short = 'w')]
        watch: Option<humantime::Duration>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not set up the controller client")]
        Client(#[source] crate::Error),
        #[error("could not read the heater status")]
        Read(#[source] crate::Error),
        #[error("could not output the status")]
        Output(#[source] output::Error),
    }

    const HEADERS: [&str; 15] = [
        "Retrieved at",
        "Protocol",
        "Degraded session",
        "Room °C",
        "CO setpoint °C",
        "CWU setpoint °C",
        "Water °C",
        "Outside °C",
        "Return °C",
        "Heater",
        "Water heating",
        "Pump",
        "Mode",
        "Power W",
        "Error code",
    ];

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = super::runtime().map_err(Error::Runtime)?;
        let client = KospelClient::new(args.connection).map_err(Error::Client)?;
        let mut output = args.output.to_output().map_err(Error::Output)?;
        output.table_headers(HEADERS.to_vec()).map_err(Error::Output)?;
        runtime.block_on(poll(&client, &mut output, args.watch))?;
        output.commit().map_err(Error::Output)
    }

    async fn poll(
        client: &KospelClient,
        output: &mut output::Output,
        watch: Option<humantime::Duration>,
    ) -> Result<(), Error> {
        let Some(period) = watch else {
            let status = client.get_status().await.map_err(Error::Read)?;
            return record(output, &status);
        };
        let mut interval = tokio::time::interval(*period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match client.get_status().await {
                Ok(status) => {
                    record(output, &status)?;
                    output.flush().map_err(Error::Output)?;
                }
                Err(e) => tracing::warn!(
                    message = "poll failed",
                    kind = ?e.kind(),
                    error = (&e as &dyn std::error::Error)
                ),
            }
        }
    }

    fn record(output: &mut output::Output, status: &crate::DecodedStatus) -> Result<(), Error> {
        output
            .record(
                || {
                    let mut row = vec![
                        status.retrieved_at.to_string(),
                        status.protocol.to_string(),
                        status.degraded_session.to_string(),
                    ];
                    row.extend(status.display_values().into_iter().map(|(_, value)| value));
                    row
                },
                || status,
            )
            .map_err(Error::Output)
    }
}

pub mod variables {
    use crate::registers::{self, Register};
    use crate::{output, Protocol};

    /// Search and output the known status variables and registers.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        output: output::Args,
        /// Only list the catalog of this protocol.
        #[arg(long, value_enum)]
        protocol: Option<Protocol>,
        /// Only list entries whose address, field or description contains this text.
        filter: Option<String>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not output the variables")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    struct Entry<'a> {
        protocol: Protocol,
        #[serde(flatten)]
        register: &'a Register,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let protocols = match args.protocol {
            Some(protocol) => vec![protocol],
            None => vec![Protocol::Ekd, Protocol::Legacy],
        };
        let mut output = args.output.to_output().map_err(Error::Output)?;
        output
            .table_headers(vec!["Protocol", "Address", "Field", "Decoding", "Description"])
            .map_err(Error::Output)?;
        for protocol in protocols {
            for register in registers::catalog(protocol) {
                if let Some(pattern) = &args.filter {
                    if !register.is_match(pattern) {
                        continue;
                    }
                }
                output
                    .record(
                        || {
                            vec![
                                protocol.to_string(),
                                register.address.to_string(),
                                register.field.to_string(),
                                register.kind.to_string(),
                                register.description.to_string(),
                            ]
                        },
                        || Entry { protocol, register },
                    )
                    .map_err(Error::Output)?;
            }
        }
        output.commit().map_err(Error::Output)
    }
}

pub mod decode {
    use crate::codec::{self, Decoded, RawValue};
    use crate::registers::{self, Field};
    use crate::{output, Protocol};

    /// Show every known interpretation of a raw register word.
    ///
    /// Compare the output with the value the controller's web interface displays to find out
    /// how a register is encoded.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        output: output::Args,
        /// The word, as four hex digits (e.g. `4a01`).
        word: String,
        /// Also decode the word the way the status read decodes this field.
        #[arg(long)]
        field: Option<Field>,
        /// The protocol the word was read over.
        #[arg(long, value_enum, default_value_t = Protocol::Legacy)]
        protocol: Protocol,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("`{0}` is not a 16-bit hex word")]
        InvalidWord(String),
        #[error("could not output the interpretations")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    struct Interpretation {
        interpretation: String,
        value: String,
    }

    fn describe(value: Option<Decoded>) -> String {
        match value {
            None => "unavailable".into(),
            Some(Decoded::Temperature(t)) => format!("{t} °C"),
            Some(Decoded::Setpoint(s)) if s.verified => format!("{} °C", s.celsius),
            Some(Decoded::Setpoint(s)) => format!("{} °C (unverified)", s.celsius),
            Some(Decoded::Flag(b)) => b.to_string(),
            Some(Decoded::Mode(m)) => m.to_string(),
            Some(Decoded::Power(w)) => format!("{w} W"),
            Some(Decoded::ErrorCode(c)) => c.to_string(),
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let word = RawValue::Hex(args.word.clone())
            .word()
            .ok_or_else(|| Error::InvalidWord(args.word.clone()))?;
        let mut rows = codec::candidates(word)
            .into_iter()
            .map(|(name, value)| Interpretation {
                interpretation: name.to_string(),
                value: value.to_string(),
            })
            .collect::<Vec<_>>();
        if let Some(field) = args.field {
            let register = match args.protocol {
                Protocol::Ekd => registers::ekd_variable(field),
                Protocol::Legacy => registers::legacy_register(field),
            };
            if let Some(register) = register {
                let raw = match args.protocol {
                    Protocol::Ekd => RawValue::Integer(i64::from(word)),
                    Protocol::Legacy => RawValue::Hex(args.word.clone()),
                };
                rows.push(Interpretation {
                    interpretation: format!("{field} at {}", register.address),
                    value: describe(codec::decode(register, raw)),
                });
            }
        }
        let mut output = args.output.to_output().map_err(Error::Output)?;
        output.table_headers(vec!["Interpretation", "Value"]).map_err(Error::Output)?;
        for row in &rows {
            output
                .record(|| vec![row.interpretation.clone(), row.value.clone()], || row)
                .map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)
    }

}
