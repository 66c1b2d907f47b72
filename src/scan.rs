//! Weaving of class files, jar archives and directory trees.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::classfile::ClassFile;
use crate::hierarchy::{ClassHierarchy, DefaultHierarchy};
use crate::registry::TransformRegistry;
use crate::report::ClassRecord;

/// Classes seen during one run and what happened to them.
#[derive(Debug, Default)]
pub struct WeaveOutput {
    pub records: Vec<ClassRecord>,
    pub class_count: usize,
    /// Number of rewritten methods across all classes.
    pub rewritten_count: usize,
}

impl WeaveOutput {
    fn push(&mut self, record: ClassRecord) {
        self.class_count += 1;
        self.rewritten_count += record.rewritten.len();
        self.records.push(record);
    }
}

/// Rewrite `input` (a `.class` file, a `.jar` or a directory) into `output`.
///
/// Superclasses of every class in `input` are collected first, so frames merging
/// two of its types resolve to their real common superclass.
pub fn weave_path(registry: &TransformRegistry, input: &Path, output: &Path) -> Result<WeaveOutput> {
    let (input_path, output_path) = (resolve(input), resolve(output));
    if input_path == output_path {
        anyhow::bail!("output must differ from input: {}", output.display());
    }
    let mut result = WeaveOutput::default();
    if input.is_dir() {
        if output_path.starts_with(&input_path) {
            anyhow::bail!(
                "output {} must not be inside input directory {}",
                output.display(),
                input.display()
            );
        }
        let mut classes = DefaultHierarchy::empty();
        collect_dir_classes(input, &mut classes)?;
        let run = Run {
            registry,
            classes: &classes,
        };
        weave_dir(&run, input, output, &mut result)?;
        return Ok(result);
    }

    let extension = input.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let mut classes = DefaultHierarchy::empty();
    match extension {
        "class" => {
            let data =
                fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
            record_class(&data, &mut classes);
            let run = Run {
                registry,
                classes: &classes,
            };
            weave_class_file(&run, input, output, &mut result)?
        }
        "jar" => {
            collect_jar_classes(input, &mut classes)?;
            let run = Run {
                registry,
                classes: &classes,
            };
            weave_jar_file(&run, input, output, &mut result)?
        }
        _ => anyhow::bail!("unsupported input file: {}", input.display()),
    }
    Ok(result)
}

/// Rewrite one class given its bytes; the class name is read from the bytes.
pub fn weave_class_bytes(
    registry: &TransformRegistry,
    uri: String,
    data: &[u8],
) -> Result<(Vec<u8>, ClassRecord)> {
    let mut classes = DefaultHierarchy::empty();
    record_class(data, &mut classes);
    let run = Run {
        registry,
        classes: &classes,
    };
    weave_class(&run, uri, data)
}

/// Registry plus the classes of the input being woven.
struct Run<'a> {
    registry: &'a TransformRegistry,
    classes: &'a dyn ClassHierarchy,
}

fn weave_class(run: &Run<'_>, uri: String, data: &[u8]) -> Result<(Vec<u8>, ClassRecord)> {
    let class = ClassFile::parse(data).with_context(|| format!("failed to parse {uri}"))?;
    let class_name = class.name()?;
    let (bytes, rewritten) = run
        .registry
        .transform_with_classes(&class_name, data, run.classes)
        .with_context(|| format!("failed to rewrite {uri}"))?;
    if !rewritten.is_empty() {
        debug!(class = %class_name, methods = rewritten.len(), "rewrote class");
    }
    let record = ClassRecord {
        uri,
        class_name,
        length: data.len() as u64,
        rewritten,
    };
    Ok((bytes, record))
}

fn weave_class_file(
    run: &Run<'_>,
    input: &Path,
    output: &Path,
    result: &mut WeaveOutput,
) -> Result<()> {
    let data = fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let (bytes, record) = weave_class(run, path_to_uri(input), &data)?;
    create_parent(output)?;
    fs::write(output, bytes).with_context(|| format!("failed to write {}", output.display()))?;
    result.push(record);
    Ok(())
}

fn weave_dir(run: &Run<'_>, input: &Path, output: &Path, result: &mut WeaveOutput) -> Result<()> {
    fs::create_dir_all(output)
        .with_context(|| format!("failed to create directory {}", output.display()))?;

    for entry in sorted_entries(input)? {
        let Some(name) = entry.file_name() else {
            continue;
        };
        let target = output.join(name);
        if entry.is_dir() {
            weave_dir(run, &entry, &target, result)?;
        } else if is_class_name(&path_key(&entry)) {
            weave_class_file(run, &entry, &target, result)?;
        } else {
            fs::copy(&entry, &target).with_context(|| {
                format!("failed to copy {} to {}", entry.display(), target.display())
            })?;
        }
    }
    Ok(())
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", dir.display()))?;
        entries.push(entry.path());
    }

    // Sorted listings keep the output and the report deterministic.
    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));
    Ok(entries)
}

fn collect_dir_classes(dir: &Path, classes: &mut DefaultHierarchy) -> Result<()> {
    for entry in sorted_entries(dir)? {
        if entry.is_dir() {
            collect_dir_classes(&entry, classes)?;
        } else if is_class_name(&path_key(&entry)) {
            let data =
                fs::read(&entry).with_context(|| format!("failed to read {}", entry.display()))?;
            record_class(&data, classes);
        }
    }
    Ok(())
}

fn collect_jar_classes(input: &Path, classes: &mut DefaultHierarchy) -> Result<()> {
    let file = fs::File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", input.display()))?;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", input.display()))?;
        if entry.is_dir() || !is_class_name(entry.name()) {
            continue;
        }
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", input.display(), entry.name()))?;
        record_class(&data, classes);
    }
    Ok(())
}

/// Add the name, superclass and interface flag of `data` to `classes`.
/// Unparseable classes are left out here and reported when woven.
fn record_class(data: &[u8], classes: &mut DefaultHierarchy) {
    let Ok(class) = ClassFile::parse(data) else {
        return;
    };
    let (Ok(name), Ok(super_name)) = (class.name(), class.super_name()) else {
        return;
    };
    if class.is_interface() {
        classes.insert_interface(&name);
    } else if let Some(super_name) = super_name {
        classes.insert(&name, &super_name);
    }
}

fn weave_jar_file(
    run: &Run<'_>,
    input: &Path,
    output: &Path,
    result: &mut WeaveOutput,
) -> Result<()> {
    let file = fs::File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", input.display()))?;

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", input.display()))?;
        entry_names.push(entry.name().to_string());
    }
    entry_names.sort();

    create_parent(output)?;
    let out = fs::File::create(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut writer = ZipWriter::new(out);

    for name in entry_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", input.display(), name))?;
        let options = SimpleFileOptions::default().compression_method(entry.compression());
        if entry.is_dir() {
            writer
                .add_directory(name.as_str(), options)
                .with_context(|| format!("failed to write {}:{}", output.display(), name))?;
            continue;
        }
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", input.display(), name))?;
        let bytes = if is_class_name(&name) {
            let (bytes, record) = weave_class(run, jar_entry_uri(input, &name), &data)?;
            result.push(record);
            bytes
        } else {
            data
        };
        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("failed to write {}:{}", output.display(), name))?;
        writer
            .write_all(&bytes)
            .with_context(|| format!("failed to write {}:{}", output.display(), name))?;
    }

    writer
        .finish()
        .with_context(|| format!("failed to finish {}", output.display()))?;
    Ok(())
}

fn is_class_name(name: &str) -> bool {
    name.ends_with(".class") && !name.ends_with("module-info.class") && !name.ends_with("package-info.class")
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display())),
        _ => Ok(()),
    }
}

/// Canonical form of `path`, resolving its nearest existing ancestor when the
/// path itself does not exist yet.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            resolve(parent).join(name)
        }
        _ => path.to_path_buf(),
    }
}

fn path_to_uri(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn jar_entry_uri(jar_path: &Path, entry_name: &str) -> String {
    format!("jar:{}!/{}", jar_path.to_string_lossy(), entry_name)
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Output location used by the CLI when `--output` names a directory and the
/// input is a single file.
pub fn output_file_for(input: &Path, output: &Path) -> PathBuf {
    match input.file_name() {
        Some(name) if output.is_dir() => output.join(name),
        _ => output.to_path_buf(),
    }
}
