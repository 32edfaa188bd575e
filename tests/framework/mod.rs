//! Shared test plugins and helpers.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use deimos::prelude::*;

pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

/// Values observed by a [`CollectSink`], one entry per consumed buffer.
pub type Seen = Arc<Mutex<Vec<Vec<f32>>>>;

/// Source emitting one single-element buffer per configured value, on every
/// output port, then ending its stream.
#[derive(Debug, Clone, Default)]
pub struct VectorSource {
    values: Vec<f32>,
    fanout: usize,
    cursor: usize,
}

impl VectorSource {
    pub fn new(values: &[f32]) -> Self {
        VectorSource {
            values: values.to_vec(),
            fanout: 1,
            cursor: 0,
        }
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }
}

impl TaskPlugin for VectorSource {
    fn output_parameters(&self) -> Vec<OutputParameter> {
        vec![OutputParameter::with_dims(1); self.fanout.max(1)]
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        match name {
            "values" => {
                self.values = value.as_f32_vec()?;
                Ok(())
            }
            _ => Err(Error::JsonKey(format!("Property `{name}` does not exist")).into()),
        }
    }

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        if self.values.is_empty() {
            return Vec::new();
        }
        let values = self.values.iter().map(|&v| PropertyValue::Float(v as f64)).collect();
        vec![("values".into(), PropertyValue::List(values))]
    }
}

impl SourceTask for VectorSource {
    fn initialize(&mut self, output_dims: &mut [Vec<usize>]) -> Result<()> {
        for dims in output_dims.iter_mut() {
            *dims = vec![1];
        }
        Ok(())
    }

    fn generate(&mut self, outputs: &mut [Buffer], _queue: &CommandQueue) -> Result<bool> {
        if self.cursor >= self.values.len() {
            return Ok(false);
        }
        for output in outputs.iter_mut() {
            output.fill_with_value(self.values[self.cursor]);
        }
        self.cursor += 1;
        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn SourceTask> {
        let mut copy = self.clone();
        copy.cursor = 0;
        Box::new(copy)
    }
}

/// Source that emits the same value forever; only a stop request or a
/// drained pool ends it.
#[derive(Debug, Clone, Default)]
pub struct LoopSource;

impl TaskPlugin for LoopSource {
    fn output_parameters(&self) -> Vec<OutputParameter> {
        vec![OutputParameter::with_dims(1)]
    }
}

impl SourceTask for LoopSource {
    fn initialize(&mut self, output_dims: &mut [Vec<usize>]) -> Result<()> {
        output_dims[0] = vec![1];
        Ok(())
    }

    fn generate(&mut self, outputs: &mut [Buffer], _queue: &CommandQueue) -> Result<bool> {
        outputs[0].fill_with_value(1.0);
        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn SourceTask> {
        Box::new(self.clone())
    }
}

/// Host processor scaling every element by `factor`, with an optional clamp
/// window set through a raw JSON object property and an optional task-valued
/// `fallback` property for serialization tests.
#[derive(Debug)]
pub struct Multiply {
    factor: f32,
    clamp: Option<(f32, f32)>,
    fallback: Option<Task>,
}

impl Default for Multiply {
    fn default() -> Self {
        Multiply {
            factor: 1.0,
            clamp: None,
            fallback: None,
        }
    }
}

impl Multiply {
    pub fn with_factor(factor: f32) -> Self {
        Multiply {
            factor,
            ..Default::default()
        }
    }
}

impl TaskPlugin for Multiply {
    fn input_parameters(&self) -> Vec<InputParameter> {
        vec![InputParameter::infinite()]
    }

    fn output_parameters(&self) -> Vec<OutputParameter> {
        vec![OutputParameter::with_dims(1)]
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        match name {
            "factor" => {
                self.factor = value.as_f32()?;
                Ok(())
            }
            "fallback" => match value {
                PropertyValue::Task(task) => {
                    self.fallback = Some(task);
                    Ok(())
                }
                other => Err(Error::JsonKey(format!("expected a task, got {other:?}")).into()),
            },
            _ => Err(Error::JsonKey(format!("Property `{name}` does not exist")).into()),
        }
    }

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        let mut properties = Vec::new();
        if self.factor != 1.0 {
            properties.push(("factor".into(), PropertyValue::Float(self.factor as f64)));
        }
        if let Some(fallback) = &self.fallback {
            properties.push((
                "fallback".into(),
                PropertyValue::Task(fallback.duplicate_as(fallback.identifier())),
            ));
        }
        properties
    }

    fn set_json_object_property(&mut self, name: &str, object: &serde_json::Map<String, serde_json::Value>) -> Result<()> {
        match name {
            "clamp" => {
                let bound = |key: &str| -> Result<f32> {
                    object
                        .get(key)
                        .and_then(serde_json::Value::as_f64)
                        .map(|v| v as f32)
                        .ok_or_else(|| Error::JsonKey(format!("`clamp` needs a numeric `{key}`")).into())
                };
                self.clamp = Some((bound("lo")?, bound("hi")?));
                Ok(())
            }
            _ => Err(Error::JsonKey(format!("Property `{name}` does not exist")).into()),
        }
    }
}

impl ProcessorTask for Multiply {
    fn initialize(&mut self, work: &[&Buffer], output_dims: &mut [Vec<usize>]) -> Result<()> {
        output_dims[0] = work[0].dims().to_vec();
        Ok(())
    }

    fn process_cpu(&mut self, work: &[&Buffer], result: &mut [Buffer], _queue: &CommandQueue) -> Result<()> {
        for (out, input) in result[0].data_mut().iter_mut().zip(work[0].data()) {
            let mut value = input * self.factor;
            if let Some((lo, hi)) = self.clamp {
                value = value.clamp(lo, hi);
            }
            *out = value;
        }
        Ok(())
    }

    fn duplicate(&self) -> Box<dyn ProcessorTask> {
        Box::new(Multiply {
            factor: self.factor,
            clamp: self.clamp,
            fallback: self.fallback.as_ref().map(|t| t.duplicate_as(t.identifier())),
        })
    }
}

/// GPU processor scaling its first input, reporting one completed kernel
/// event per processed batch. `n_inputs` > 1 makes it a joining node for
/// expansion tests.
#[derive(Debug, Clone)]
pub struct GpuScale {
    factor: f32,
    n_inputs: usize,
}

impl Default for GpuScale {
    fn default() -> Self {
        GpuScale {
            factor: 1.0,
            n_inputs: 1,
        }
    }
}

impl GpuScale {
    pub fn new(factor: f32) -> Self {
        GpuScale {
            factor,
            n_inputs: 1,
        }
    }

    pub fn joining(factor: f32, n_inputs: usize) -> Self {
        GpuScale {
            factor,
            n_inputs,
        }
    }
}

impl TaskPlugin for GpuScale {
    fn input_parameters(&self) -> Vec<InputParameter> {
        vec![InputParameter::infinite(); self.n_inputs]
    }

    fn output_parameters(&self) -> Vec<OutputParameter> {
        vec![OutputParameter::with_dims(1)]
    }

    fn uses_gpu(&self) -> bool {
        true
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        match name {
            "factor" => {
                self.factor = value.as_f32()?;
                Ok(())
            }
            _ => Err(Error::JsonKey(format!("Property `{name}` does not exist")).into()),
        }
    }
}

impl ProcessorTask for GpuScale {
    fn initialize(&mut self, work: &[&Buffer], output_dims: &mut [Vec<usize>]) -> Result<()> {
        output_dims[0] = work[0].dims().to_vec();
        Ok(())
    }

    fn process_gpu(&mut self, work: &[&Buffer], result: &mut [Buffer], queue: &CommandQueue) -> Result<Option<Vec<GpuEvent>>> {
        for (out, input) in result[0].data_mut().iter_mut().zip(work[0].data()) {
            *out = input * self.factor;
        }
        let profile = EventProfile {
            queued: 1,
            submitted: 2,
            started: 3,
            ended: 4,
        };
        Ok(Some(vec![GpuEvent::completed(queue.clone(), CommandType::Kernel, profile)]))
    }

    fn duplicate(&self) -> Box<dyn ProcessorTask> {
        Box::new(self.clone())
    }
}

/// Reductor summing every element of its input stream into one scalar,
/// emitted once after the stream ends. Result buffers are primed with
/// `prime`.
#[derive(Debug, Clone, Default)]
pub struct SumReduce {
    prime: f32,
    emitted: bool,
}

impl SumReduce {
    pub fn primed(prime: f32) -> Self {
        SumReduce {
            prime,
            emitted: false,
        }
    }
}

impl TaskPlugin for SumReduce {
    fn input_parameters(&self) -> Vec<InputParameter> {
        vec![InputParameter::infinite()]
    }

    fn output_parameters(&self) -> Vec<OutputParameter> {
        vec![OutputParameter::with_dims(1)]
    }
}

impl ReductorTask for SumReduce {
    fn initialize(&mut self, _work: &[&Buffer], output_dims: &mut [Vec<usize>], default_value: &mut f32) -> Result<()> {
        output_dims[0] = vec![1];
        *default_value = self.prime;
        Ok(())
    }

    fn collect(&mut self, work: &[&Buffer], result: &mut [Buffer], _queue: &CommandQueue) -> Result<()> {
        let sum: f32 = work[0].data().iter().sum();
        result[0].data_mut()[0] += sum;
        Ok(())
    }

    fn reduce(&mut self, _result: &mut [Buffer], _queue: &CommandQueue) -> Result<bool> {
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn ReductorTask> {
        let mut copy = self.clone();
        copy.emitted = false;
        Box::new(copy)
    }
}

/// Processor scaling a stream (port 1) by a one-shot configuration buffer
/// (port 0, expected item count 1, retained across iterations).
#[derive(Debug, Clone, Default)]
pub struct StickyScale;

impl TaskPlugin for StickyScale {
    fn input_parameters(&self) -> Vec<InputParameter> {
        vec![InputParameter::expecting(1), InputParameter::infinite()]
    }

    fn output_parameters(&self) -> Vec<OutputParameter> {
        vec![OutputParameter::with_dims(1)]
    }
}

impl ProcessorTask for StickyScale {
    fn initialize(&mut self, work: &[&Buffer], output_dims: &mut [Vec<usize>]) -> Result<()> {
        output_dims[0] = work[1].dims().to_vec();
        Ok(())
    }

    fn process_cpu(&mut self, work: &[&Buffer], result: &mut [Buffer], _queue: &CommandQueue) -> Result<()> {
        let factor = work[0].data()[0];
        for (out, input) in result[0].data_mut().iter_mut().zip(work[1].data()) {
            *out = input * factor;
        }
        Ok(())
    }

    fn duplicate(&self) -> Box<dyn ProcessorTask> {
        Box::new(self.clone())
    }
}

/// Processor whose processing callback always fails.
#[derive(Debug, Clone, Default)]
pub struct FailTask;

impl TaskPlugin for FailTask {
    fn input_parameters(&self) -> Vec<InputParameter> {
        vec![InputParameter::infinite()]
    }

    fn output_parameters(&self) -> Vec<OutputParameter> {
        vec![OutputParameter::with_dims(1)]
    }
}

impl ProcessorTask for FailTask {
    fn initialize(&mut self, work: &[&Buffer], output_dims: &mut [Vec<usize>]) -> Result<()> {
        output_dims[0] = work[0].dims().to_vec();
        Ok(())
    }

    fn process_cpu(&mut self, _work: &[&Buffer], _result: &mut [Buffer], _queue: &CommandQueue) -> Result<()> {
        Err(anyhow!("deliberate failure"))
    }

    fn duplicate(&self) -> Box<dyn ProcessorTask> {
        Box::new(self.clone())
    }
}

/// Sink recording every consumed buffer, in consumption order.
#[derive(Debug, Clone)]
pub struct CollectSink {
    seen: Seen,
    n_inputs: usize,
}

impl Default for CollectSink {
    fn default() -> Self {
        CollectSink {
            seen: Arc::new(Mutex::new(Vec::new())),
            n_inputs: 1,
        }
    }
}

impl CollectSink {
    pub fn new(n_inputs: usize) -> (Self, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        (
            CollectSink {
                seen: seen.clone(),
                n_inputs,
            },
            seen,
        )
    }
}

impl TaskPlugin for CollectSink {
    fn input_parameters(&self) -> Vec<InputParameter> {
        vec![InputParameter::infinite(); self.n_inputs]
    }
}

impl SinkTask for CollectSink {
    fn consume(&mut self, work: &[&Buffer], _queue: &CommandQueue) -> Result<()> {
        let mut seen = self.seen.lock().unwrap();
        for buffer in work {
            seen.push(buffer.data().to_vec());
        }
        Ok(())
    }

    fn duplicate(&self) -> Box<dyn SinkTask> {
        Box::new(self.clone())
    }
}

/// Build the plugin registry the JSON tests load graphs through.
pub fn registry() -> PluginManager {
    let mut manager = PluginManager::new();
    manager.register("src", || TaskKind::Source(Box::new(VectorSource::default())));
    manager.register("mul", || TaskKind::Processor(Box::new(Multiply::default())));
    manager.register("gpu", || TaskKind::Processor(Box::new(GpuScale::default())));
    manager.register("sum", || TaskKind::Reductor(Box::new(SumReduce::default())));
    manager.register("snk", || TaskKind::Sink(Box::new(CollectSink::default())));
    manager.register(DummyTask::PLUGIN_NAME, DummyTask::kind);
    manager
}

pub fn source_task(name: &str, values: &[f32]) -> Task {
    Task::new("src", name, TaskKind::Source(Box::new(VectorSource::new(values)))).unwrap()
}

pub fn fanout_source_task(name: &str, values: &[f32], fanout: usize) -> Task {
    let source = VectorSource::new(values).with_fanout(fanout);
    Task::new("src", name, TaskKind::Source(Box::new(source))).unwrap()
}

pub fn mul_task(name: &str, factor: f32) -> Task {
    Task::new("mul", name, TaskKind::Processor(Box::new(Multiply::with_factor(factor)))).unwrap()
}

pub fn gpu_task(name: &str, factor: f32) -> Task {
    Task::new("gpu", name, TaskKind::Processor(Box::new(GpuScale::new(factor)))).unwrap()
}

pub fn gpu_join_task(name: &str, n_inputs: usize) -> Task {
    let join = GpuScale::joining(1.0, n_inputs);
    Task::new("gpu", name, TaskKind::Processor(Box::new(join))).unwrap()
}

pub fn sum_task(name: &str, prime: f32) -> Task {
    Task::new("sum", name, TaskKind::Reductor(Box::new(SumReduce::primed(prime)))).unwrap()
}

pub fn sticky_task(name: &str) -> Task {
    Task::new("sticky", name, TaskKind::Processor(Box::new(StickyScale))).unwrap()
}

pub fn fail_task(name: &str) -> Task {
    Task::new("fail", name, TaskKind::Processor(Box::new(FailTask))).unwrap()
}

pub fn sink_task(name: &str, n_inputs: usize) -> (Task, Seen) {
    let (sink, seen) = CollectSink::new(n_inputs);
    let task = Task::new("snk", name, TaskKind::Sink(Box::new(sink))).unwrap();
    (task, seen)
}

pub fn loop_source_task(name: &str) -> Task {
    Task::new("loop", name, TaskKind::Source(Box::new(LoopSource))).unwrap()
}
