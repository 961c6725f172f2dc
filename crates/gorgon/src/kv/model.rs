use {
    super::KvInstruction,
    crate::{CheckedOperation, Effect, Instruction, Model, Output, Value},
    consistency_model::partition_by,
    std::{collections::BTreeMap, sync::Arc},
};

/// A map from keys to integers. Absent keys read as nil.
#[derive(Clone, Copy, Debug, Default)]
pub struct KvModel;

impl Model for KvModel {
    type State = BTreeMap<String, i64>;
    type Input = Arc<dyn Instruction>;
    type Output = Output;

    fn init(&self) -> Vec<Self::State> {
        vec![BTreeMap::new()]
    }

    fn step(&self, state: &Self::State, input: &Self::Input, output: &Self::Output) -> Vec<Self::State> {
        let Some(instruction) = input.downcast_ref::<KvInstruction>() else {
            return Vec::new();
        };
        match instruction {
            KvInstruction::Get { key } => {
                let Ok(value) = &output.result else {
                    // A failed read observes nothing.
                    return vec![state.clone()];
                };
                let consistent = match (state.get(key), value) {
                    (Some(stored), Value::Int(read)) => stored == read,
                    (None, Value::Nil) => true,
                    _ => false,
                };
                if consistent {
                    vec![state.clone()]
                } else {
                    Vec::new()
                }
            }
            KvInstruction::Set { key, value } => {
                let mut next = state.clone();
                next.insert(key.clone(), *value);
                match (&output.result, output.effect) {
                    (Ok(Value::Nil), _) => vec![next],
                    (Ok(_), _) => Vec::new(),
                    (Err(_), Effect::NotApplied) => vec![state.clone()],
                    (Err(_), _) => vec![state.clone(), next],
                }
            }
        }
    }

    fn partition(&self, history: Vec<CheckedOperation>) -> Vec<Vec<CheckedOperation>> {
        partition_by(history, |op| op.input.partition_key().map(str::to_owned))
    }

    fn describe_operation(&self, input: &Self::Input, output: &Self::Output) -> String {
        format!("{input} → {output}")
    }

    fn describe_state(&self, state: &Self::State) -> String {
        let entries: Vec<_> = state.iter().map(|(k, v)| format!("{k:?}: {v}")).collect();
        format!("{{{}}}", entries.join(", "))
    }
}
