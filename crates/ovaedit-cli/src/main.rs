//! OVAEdit CLI - Edit OVF descriptors and OVA packages.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ovaedit_core::{
    AddDiskOptions, Ovf, OvfOptions, ProductField, ResourceKind, WritePhase,
};

/// Edit virtual hardware, product information and disks of OVF/OVA packages.
#[derive(Parser)]
#[command(name = "ovaedit")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More logging (-v info, -vv debug). `OVAEDIT_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Skip manifest verification on load.
    #[arg(long, global = true)]
    no_verify: bool,

    /// Fail when the manifest does not match the package.
    #[arg(long, global = true, conflicts_with = "no_verify")]
    strict: bool,

    /// Directory for staging archive contents when rewriting in place.
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Product class to validate hardware against, overriding the descriptor.
    #[arg(long, global = true)]
    product_class: Option<String>,

    /// Suppress progress output.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a summary of a package.
    Info {
        /// Path to the .ovf or .ova package.
        package: PathBuf,
    },

    /// Edit virtual hardware.
    EditHardware {
        #[command(flatten)]
        target: Target,

        /// Configuration profiles to edit. Defaults to all profiles.
        #[arg(short, long, value_delimiter = ',')]
        profiles: Vec<String>,

        /// Number of virtual CPUs.
        #[arg(short, long)]
        cpus: Option<u32>,

        /// Memory in MiB.
        #[arg(short, long)]
        memory: Option<u64>,

        /// Number of network adapters.
        #[arg(short, long)]
        nics: Option<usize>,

        /// NIC device types, such as e1000 or vmxnet3.
        #[arg(long, num_args = 1..)]
        nic_types: Vec<String>,

        /// Networks to connect NICs to, in NIC order.
        #[arg(long, num_args = 1..)]
        nic_networks: Vec<String>,

        /// MAC addresses of the NICs, in NIC order.
        #[arg(long, num_args = 1..)]
        mac_addresses: Vec<String>,

        /// Display names of the NICs, in NIC order.
        #[arg(long, num_args = 1..)]
        nic_names: Vec<String>,

        /// Number of serial ports.
        #[arg(long)]
        serial_ports: Option<usize>,

        /// Serial port connection URIs, such as telnet://:8001.
        #[arg(long, num_args = 1..)]
        serial_connectivity: Vec<String>,

        /// SCSI controller subtypes, such as lsilogic.
        #[arg(long, num_args = 1..)]
        scsi_subtypes: Vec<String>,

        /// IDE controller subtypes, such as PIIX4.
        #[arg(long, num_args = 1..)]
        ide_subtypes: Vec<String>,
    },

    /// Edit product information, properties and the annotation.
    EditProduct {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        product: Option<String>,

        #[arg(long)]
        vendor: Option<String>,

        /// Short product version.
        #[arg(long = "product-version")]
        product_version: Option<String>,

        #[arg(long)]
        full_version: Option<String>,

        #[arg(long)]
        product_url: Option<String>,

        #[arg(long)]
        vendor_url: Option<String>,

        /// Product property as KEY=VALUE; repeatable.
        #[arg(long = "property")]
        properties: Vec<String>,

        /// Free-form annotation text.
        #[arg(long)]
        annotation: Option<String>,
    },

    /// Add a disk image or ISO to a package.
    AddDisk {
        /// Disk image to add.
        image: PathBuf,

        #[command(flatten)]
        target: Target,

        /// Drive type (harddisk or cdrom). Guessed from the image by default.
        #[arg(short = 't', long = "type")]
        kind: Option<ResourceKind>,

        #[arg(long)]
        file_id: Option<String>,

        #[arg(long)]
        disk_id: Option<String>,

        /// Controller type (ide, scsi or sata).
        #[arg(short, long)]
        controller: Option<ResourceKind>,

        /// Controller and unit, such as 0:1.
        #[arg(short, long)]
        address: Option<String>,

        /// Controller subtype, such as lsilogic.
        #[arg(long)]
        subtype: Option<String>,

        /// Drive display name.
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Profiles the new drive belongs to. Defaults to all profiles.
        #[arg(short, long, value_delimiter = ',')]
        profiles: Vec<String>,
    },

    /// List, create or delete configuration profiles.
    Profiles {
        #[command(flatten)]
        target: Target,

        /// Create (or relabel) a profile with this id.
        #[arg(long, conflicts_with = "delete")]
        create: Option<String>,

        /// Label for --create.
        #[arg(long, requires = "create")]
        label: Option<String>,

        /// Description for --create.
        #[arg(long, requires = "create")]
        description: Option<String>,

        /// Delete the profile with this id, and items only it used.
        #[arg(long)]
        delete: Option<String>,
    },
}

#[derive(Args)]
struct Target {
    /// Path to the .ovf or .ova package.
    package: PathBuf,

    /// Where to write the result. Defaults to overwriting the input.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Target {
    fn output(&self) -> &Path {
        self.output.as_deref().unwrap_or(&self.package)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("OVAEDIT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let mut options = if cli.strict {
        OvfOptions::strict()
    } else {
        OvfOptions::default()
    }
    .with_manifest_verification(!cli.no_verify);
    if let Some(dir) = &cli.scratch_dir {
        options = options.with_scratch_dir(dir);
    }
    if let Some(class) = &cli.product_class {
        options = options.with_product_class(class);
    }

    match &cli.command {
        Commands::Info { package } => {
            let ovf = load(package, options)?;
            show_info(&ovf)?;
        }
        Commands::EditHardware {
            target,
            profiles,
            cpus,
            memory,
            nics,
            nic_types,
            nic_networks,
            mac_addresses,
            nic_names,
            serial_ports,
            serial_connectivity,
            scsi_subtypes,
            ide_subtypes,
        } => {
            let mut ovf = load(&target.package, options)?;
            let profiles: Vec<&str> = profiles.iter().map(String::as_str).collect();
            if let Some(cpus) = cpus {
                ovf.set_cpu_count(*cpus, &profiles)?;
            }
            if let Some(memory) = memory {
                ovf.set_memory(*memory, &profiles)?;
            }
            if let Some(nics) = nics {
                ovf.set_nic_count(*nics, &profiles)?;
            }
            if !nic_types.is_empty() {
                ovf.set_nic_types(nic_types, &profiles)?;
            }
            if !nic_networks.is_empty() {
                ovf.set_nic_networks(nic_networks, &profiles)?;
            }
            if !mac_addresses.is_empty() {
                ovf.set_nic_mac_addresses(mac_addresses, &profiles)?;
            }
            if !nic_names.is_empty() {
                ovf.set_nic_names(nic_names, &profiles)?;
            }
            if let Some(count) = serial_ports {
                ovf.set_serial_count(*count, &profiles)?;
            }
            if !serial_connectivity.is_empty() {
                ovf.set_serial_connectivity(serial_connectivity, &profiles)?;
            }
            if !scsi_subtypes.is_empty() {
                ovf.set_scsi_subtypes(scsi_subtypes, &profiles)?;
            }
            if !ide_subtypes.is_empty() {
                ovf.set_ide_subtypes(ide_subtypes, &profiles)?;
            }
            write(&mut ovf, target.output(), cli.quiet)?;
        }
        Commands::EditProduct {
            target,
            product,
            vendor,
            product_version,
            full_version,
            product_url,
            vendor_url,
            properties,
            annotation,
        } => {
            let mut ovf = load(&target.package, options)?;
            let fields = [
                (ProductField::Product, product),
                (ProductField::Vendor, vendor),
                (ProductField::Version, product_version),
                (ProductField::FullVersion, full_version),
                (ProductField::ProductUrl, product_url),
                (ProductField::VendorUrl, vendor_url),
            ];
            for (field, value) in fields {
                if let Some(value) = value {
                    ovf.set_product_field(field, value)?;
                }
            }
            for property in properties {
                let Some((key, value)) = property.split_once('=') else {
                    bail!("property '{}' is not KEY=VALUE", property);
                };
                ovf.set_product_property(key.trim(), value)?;
            }
            if let Some(text) = annotation {
                ovf.set_annotation(text)?;
            }
            write(&mut ovf, target.output(), cli.quiet)?;
        }
        Commands::AddDisk {
            image,
            target,
            kind,
            file_id,
            disk_id,
            controller,
            address,
            subtype,
            name,
            description,
            profiles,
        } => {
            let mut ovf = load(&target.package, options)?;
            let attachment = ovf.add_disk(
                image,
                &AddDiskOptions {
                    kind: *kind,
                    file_id: file_id.clone(),
                    disk_id: disk_id.clone(),
                    controller: *controller,
                    address: address.clone(),
                    subtype: subtype.clone(),
                    name: name.clone(),
                    description: description.clone(),
                    profiles: profiles.clone(),
                },
            )?;
            if !cli.quiet {
                println!(
                    "Added {} as file {} on controller {} (item {})",
                    image.display(),
                    attachment.file_id,
                    attachment.controller_id,
                    attachment.instance_id
                );
            }
            write(&mut ovf, target.output(), cli.quiet)?;
        }
        Commands::Profiles {
            target,
            create,
            label,
            description,
            delete,
        } => {
            let mut ovf = load(&target.package, options)?;
            match (create, delete) {
                (Some(id), _) => {
                    ovf.create_configuration_profile(
                        id,
                        label.as_deref().unwrap_or(id),
                        description.as_deref().unwrap_or(id),
                    )?;
                    write(&mut ovf, target.output(), cli.quiet)?;
                }
                (None, Some(id)) => {
                    ovf.delete_configuration_profile(id)?;
                    write(&mut ovf, target.output(), cli.quiet)?;
                }
                (None, None) => {
                    let profiles = ovf.config_profiles();
                    if profiles.is_empty() {
                        println!("No configuration profiles");
                    }
                    for profile in profiles {
                        println!("{}", profile);
                    }
                }
            }
        }
    }

    Ok(())
}

fn load(package: &Path, options: OvfOptions) -> Result<Ovf> {
    Ovf::load(package, options).with_context(|| format!("failed to load {}", package.display()))
}

fn write(ovf: &mut Ovf, output: &Path, quiet: bool) -> Result<()> {
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
        spinner.enable_steady_tick(std::time::Duration::from_millis(100));
        spinner
    };

    ovf.write_with_progress(output, &|phase: &WritePhase| {
        let message = match phase {
            WritePhase::Staging => "Staging archive contents...".to_string(),
            WritePhase::Descriptor => "Updating descriptor...".to_string(),
            WritePhase::Manifest => "Computing checksums...".to_string(),
            WritePhase::File(name) => format!("Writing {}...", name),
            WritePhase::Done => "Complete!".to_string(),
        };
        spinner.set_message(message);
    })
    .with_context(|| format!("failed to write {}", output.display()))?;

    spinner.finish_with_message("Complete!");
    if !quiet {
        println!("Wrote {}", output.display());
    }
    Ok(())
}

fn show_info(ovf: &Ovf) -> Result<()> {
    println!("Package Information");
    println!("===================");
    println!();
    println!("Source:    {}", ovf.source().display());
    println!("Version:   OVF {}", ovf.version());

    let product = ovf.product_info();
    if let Some(name) = &product.product {
        println!("Product:   {}", name);
    }
    if let Some(vendor) = &product.vendor {
        println!("Vendor:    {}", vendor);
    }
    if let Some(version) = product.full_version.as_ref().or(product.version.as_ref()) {
        println!("Release:   {}", version);
    }
    println!();

    let profiles = ovf.config_profiles();
    let mut scopes: Vec<Option<&str>> = vec![None];
    scopes.extend(profiles.iter().map(|p| Some(p.as_str())));
    for scope in scopes {
        println!("{}:", scope.unwrap_or("Default"));
        let cpus = ovf.cpu_count(scope)?.map_or("varies".to_string(), |c| c.to_string());
        let memory = ovf.memory(scope)?.map_or("varies".to_string(), |m| format!("{} MiB", m));
        println!("  CPUs:    {}", cpus);
        println!("  Memory:  {}", memory);
        println!("  NICs:    {}", ovf.nic_count(scope)?);
        println!("  Serial:  {}", ovf.serial_count(scope)?);
    }
    println!();

    let networks = ovf.networks();
    if !networks.is_empty() {
        println!("Networks:");
        for network in networks {
            println!("  {} {}", network.name, network.description.unwrap_or_default());
        }
        println!();
    }

    let files = ovf.file_entries();
    if files.is_empty() {
        println!("Files:     None");
    } else {
        println!("Files:");
        for (i, file) in files.iter().enumerate() {
            let capacity = ovf
                .find_disk_by_file_id(&file.id)
                .and_then(|d| d.capacity_bytes())
                .map(|c| format!(", capacity {}", format_bytes(c)))
                .unwrap_or_default();
            println!(
                "  {}. {} ({}){}",
                i + 1,
                file.href,
                file.size.map_or("size unknown".to_string(), format_bytes),
                capacity
            );
        }
    }

    if let Some(report) = ovf.manifest_report() {
        println!();
        if report.is_clean() {
            println!("Manifest:  OK");
        } else {
            println!("Manifest:  {}", report);
        }
    }

    Ok(())
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
